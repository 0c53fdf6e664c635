//! Core domain types for the ChatDoc client: sessions, documents, messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A user identity as reported by the backend.
///
/// The backend serializes identity fields in camelCase; optional fields are
/// omitted by older accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// Opaque user identifier.
    pub id: String,
    /// Display name.
    pub full_name: String,
    /// Account email.
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Which source supplied the currently adopted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionProvenance {
    /// The backend confirmed the credential and returned the identity.
    Remote,
    /// A locally persisted record substituted for an unreachable or silent
    /// backend.
    LocalFallback,
}

/// The reconciled, authoritative record of the signed-in user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: UserIdentity,
    /// Opaque bearer credential presented on every authenticated call.
    pub token: String,
    pub provenance: SessionProvenance,
}

/// The denormalized session record persisted at sign-in, used as the local
/// fallback when the backend cannot confirm the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSessionRecord {
    pub user: UserIdentity,
    pub token: String,
    pub signed_in_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Remote-side indexing status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingStatus {
    Processing,
    Completed,
    Failed,
}

impl IndexingStatus {
    /// Terminal statuses never regress to `processing` without an explicit
    /// user-initiated retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for IndexingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Where the document's bytes ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Hosted by the backend's object storage; `storage_url` points at it.
    External,
    /// Kept on the backend host itself.
    Local,
}

/// One uploaded document plus its remote indexing status and chunk
/// statistics, as returned by the upload, info, and list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Opaque document identifier used in ask/info/delete paths.
    pub uuid: String,
    /// Original file name.
    pub name: String,
    /// Byte size of the uploaded file.
    pub size: u64,
    /// Pre-formatted size in megabytes, when the backend provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<String>,
    pub page_count: u32,
    pub total_chunks: u32,
    /// The backend reports this as either a number or a numeric string.
    #[serde(deserialize_with = "chunk_count")]
    pub successful_chunks: u32,
    pub indexing_status: IndexingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Direct download locator when the bytes live in external storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_kind: Option<StorageKind>,
}

/// Accept `successful_chunks` as either a JSON number or a numeric string.
fn chunk_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(u32),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Num(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Delivery state of an optimistically appended transcript entry.
///
/// Entries are never rewritten after creation; only the delivery tag
/// resolves from `Pending` once the exchange settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Appended locally, awaiting the backend's response.
    Pending,
    /// The exchange settled successfully.
    Confirmed,
    /// The exchange failed; the paired entry carries the error notice.
    Errored,
}

/// Per-chunk descriptor attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub chunk_index: String,
    pub similarity_score: f32,
}

/// Retrieval metadata the backend attaches to an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    /// How many indexed chunks supported the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_chunks_used: Option<u32>,
    /// Relevance scores, ordered best-first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similarity_scores: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkDescriptor>,
}

/// One entry in a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Locally generated, time-sortable identifier (UUID v7).
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub delivery: DeliveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnswerMetadata>,
}

impl ChatMessage {
    fn new(role: MessageRole, content: String, delivery: DeliveryState) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            content,
            created_at: Utc::now(),
            delivery,
            metadata: None,
        }
    }

    /// An optimistic user entry, appended before the ask request resolves.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into(), DeliveryState::Pending)
    }

    /// A confirmed assistant answer with its retrieval metadata.
    pub fn assistant(content: impl Into<String>, metadata: Option<AnswerMetadata>) -> Self {
        let mut msg = Self::new(
            MessageRole::Assistant,
            content.into(),
            DeliveryState::Confirmed,
        );
        msg.metadata = metadata;
        msg
    }

    /// A visible error notice taking the assistant slot of a failed exchange.
    pub fn error_notice(reason: impl std::fmt::Display) -> Self {
        Self::new(
            MessageRole::Assistant,
            format!("Sorry, I encountered an error: {reason}. Please try again."),
            DeliveryState::Errored,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_uses_camel_case_wire_names() {
        let json = r#"{
            "id": "u-1",
            "fullName": "Ada Lovelace",
            "email": "ada@example.com",
            "isActive": true
        }"#;
        let user: UserIdentity = serde_json::from_str(json).expect("deserialize identity");
        assert_eq!(user.full_name, "Ada Lovelace");
        assert_eq!(user.is_active, Some(true));
        assert!(user.role.is_none());

        let back = serde_json::to_string(&user).expect("serialize");
        assert!(back.contains("\"fullName\""));
        assert!(!back.contains("full_name"));
    }

    #[test]
    fn fallback_record_roundtrip() {
        let record = FallbackSessionRecord {
            user: UserIdentity {
                id: "u-1".into(),
                full_name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                role: None,
                is_active: None,
                created_at: None,
                updated_at: None,
            },
            token: "tok-abc".into(),
            signed_in_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"signedInAt\""));
        let parsed: FallbackSessionRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.token, "tok-abc");
        assert_eq!(parsed.user.email, "ada@example.com");
    }

    #[test]
    fn document_accepts_numeric_or_string_chunk_count() {
        let numeric = r#"{
            "uuid": "d-1", "name": "paper.pdf", "size": 1048576,
            "page_count": 12, "total_chunks": 40, "successful_chunks": 40,
            "indexing_status": "completed"
        }"#;
        let doc: DocumentRecord = serde_json::from_str(numeric).expect("numeric count");
        assert_eq!(doc.successful_chunks, 40);
        assert_eq!(doc.indexing_status, IndexingStatus::Completed);

        let stringly = r#"{
            "uuid": "d-2", "name": "paper.pdf", "size": 1048576,
            "page_count": 12, "total_chunks": 40, "successful_chunks": "39",
            "indexing_status": "processing"
        }"#;
        let doc: DocumentRecord = serde_json::from_str(stringly).expect("string count");
        assert_eq!(doc.successful_chunks, 39);
        assert!(!doc.indexing_status.is_terminal());
    }

    #[test]
    fn message_ids_are_unique() {
        let a = ChatMessage::user("first");
        let b = ChatMessage::user("second");
        assert_ne!(a.id, b.id);
        assert_eq!(a.delivery, DeliveryState::Pending);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn error_notice_embeds_reason() {
        let msg = ChatMessage::error_notice("network error: connection refused");
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.delivery, DeliveryState::Errored);
        assert!(msg.content.contains("connection refused"));
    }
}
