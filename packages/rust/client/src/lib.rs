//! Authenticated HTTP client for the ChatDoc backend.
//!
//! [`ApiClient`] issues one request per call — no retries, no polling of its
//! own — and decodes the backend's `{success, ...}` JSON envelopes into
//! domain types. A 401 response surfaces as [`ChatDocError::AuthRejected`],
//! distinct from every other failure, so the session layer can treat
//! credential expiry as an expected outcome.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use chatdoc_shared::{
    AnswerMetadata, ChatDocError, ChunkDescriptor, DocumentRecord, Result, UserIdentity,
};

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("ChatDoc/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A successful authentication exchange: the adopted identity plus the
/// bearer credential to present on subsequent calls.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: UserIdentity,
    pub token: String,
}

/// An answer to an ask request, with its retrieval metadata.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub metadata: AnswerMetadata,
}

// ---------------------------------------------------------------------------
// Wire envelopes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AuthEnvelope {
    success: bool,
    user: Option<UserIdentity>,
    token: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ProfileEnvelope {
    success: bool,
    user: Option<UserIdentity>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct DocumentEnvelope {
    success: bool,
    pdf: Option<DocumentRecord>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ListEnvelope {
    success: bool,
    pdfs: Option<Vec<DocumentRecord>>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct AckEnvelope {
    success: bool,
    message: Option<String>,
}

#[derive(Deserialize)]
struct AnswerEnvelope {
    success: bool,
    answer: Option<String>,
    context_chunks_used: Option<u32>,
    #[serde(default)]
    similarity_scores: Vec<f32>,
    #[serde(default)]
    chunks_metadata: Vec<ChunkDescriptor>,
    message: Option<String>,
}

/// Minimal shape of a failure body, for non-2xx responses.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// HTTP client for the ChatDoc backend API.
pub struct ApiClient {
    http: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client against `base_url` with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ChatDocError::config(format!("invalid backend URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ChatDocError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ChatDocError::Network(format!("invalid endpoint '{path}': {e}")))
    }

    // -----------------------------------------------------------------------
    // Auth endpoints
    // -----------------------------------------------------------------------

    /// Register a new account. Returns the created identity and its token.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn sign_up(&self, full_name: &str, email: &str, password: &str) -> Result<AuthOutcome> {
        let url = self.endpoint("api/v1/auth/signup")?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "fullName": full_name,
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: AuthEnvelope = decode(response).await?;
        auth_outcome(envelope)
    }

    /// Exchange email + password for an identity and bearer token.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        let url = self.endpoint("api/v1/auth/signin")?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: AuthEnvelope = decode(response).await?;
        auth_outcome(envelope)
    }

    /// Fetch the authoritative profile for a bearer token.
    ///
    /// Returns [`ChatDocError::AuthRejected`] when the backend rejects the
    /// credential, distinct from transport failures.
    #[instrument(skip_all)]
    pub async fn fetch_profile(&self, token: &str) -> Result<UserIdentity> {
        let url = self.endpoint("api/v1/auth/profile")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: ProfileEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "profile fetch failed"));
        }
        envelope
            .user
            .ok_or_else(|| ChatDocError::Network("profile response missing user".into()))
    }

    /// Invalidate the token server-side. Callers treat failure as
    /// best-effort; this method still reports it.
    #[instrument(skip_all)]
    pub async fn sign_out(&self, token: &str) -> Result<()> {
        let url = self.endpoint("api/v1/auth/logout")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: AckEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "sign-out failed"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document endpoints
    // -----------------------------------------------------------------------

    /// Upload a PDF for indexing. The response includes the created
    /// document record with its initial indexing status.
    #[instrument(skip_all, fields(file_name = %file_name, size = bytes.len()))]
    pub async fn upload_document(
        &self,
        token: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentRecord> {
        let url = self.endpoint("api/v1/pdf/upload")?;

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| ChatDocError::Network(e.to_string()))?;
        let form = multipart::Form::new().part("pdf", part);

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: DocumentEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "upload failed"));
        }
        envelope
            .pdf
            .ok_or_else(|| ChatDocError::Network("upload response missing document".into()))
    }

    /// Fetch a single document's record.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn document_info(&self, token: &str, document_id: &str) -> Result<DocumentRecord> {
        let url = self.endpoint(&format!("api/v1/pdf/info/{document_id}"))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: DocumentEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "document fetch failed"));
        }
        envelope
            .pdf
            .ok_or_else(|| ChatDocError::Network("info response missing document".into()))
    }

    /// List the caller's previously uploaded documents.
    #[instrument(skip_all)]
    pub async fn list_documents(&self, token: &str) -> Result<Vec<DocumentRecord>> {
        let url = self.endpoint("api/v1/pdf/list-pdf")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: ListEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "listing fetch failed"));
        }
        Ok(envelope.pdfs.unwrap_or_default())
    }

    /// Delete a document. Irreversible from the client's perspective.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn delete_document(&self, token: &str, document_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/pdf/{document_id}"))?;
        let response = self
            .http
            .delete(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: AckEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "delete failed"));
        }
        Ok(())
    }

    /// Ask a question about a document.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn ask(&self, token: &str, document_id: &str, question: &str) -> Result<Answer> {
        let url = self.endpoint(&format!("api/v1/pdf/ask/{document_id}"))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "query": question }))
            .send()
            .await
            .map_err(|e| ChatDocError::Network(e.to_string()))?;

        let envelope: AnswerEnvelope = decode(response).await?;
        if !envelope.success {
            return Err(failure(envelope.message, "ask failed"));
        }
        let text = envelope
            .answer
            .ok_or_else(|| ChatDocError::Network("ask response missing answer".into()))?;

        debug!(
            chunks = ?envelope.context_chunks_used,
            scores = envelope.similarity_scores.len(),
            "answer received"
        );

        Ok(Answer {
            text,
            metadata: AnswerMetadata {
                context_chunks_used: envelope.context_chunks_used,
                similarity_scores: envelope.similarity_scores,
                chunks: envelope.chunks_metadata,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Envelope decoding
// ---------------------------------------------------------------------------

/// Decode a response body, mapping 401 to the distinct rejection error and
/// other non-2xx statuses to an API failure carrying the server's message
/// (or a generic one when the body is unparseable).
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(ChatDocError::AuthRejected);
    }

    let body = response
        .text()
        .await
        .map_err(|e| ChatDocError::Network(format!("body read failed: {e}")))?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ChatDocError::Api { message });
    }

    serde_json::from_str(&body)
        .map_err(|e| ChatDocError::Network(format!("malformed response: {e}")))
}

fn failure(message: Option<String>, default: &str) -> ChatDocError {
    ChatDocError::Api {
        message: message.unwrap_or_else(|| default.to_string()),
    }
}

fn auth_outcome(envelope: AuthEnvelope) -> Result<AuthOutcome> {
    if !envelope.success {
        return Err(failure(envelope.message, "authentication failed"));
    }
    match (envelope.user, envelope.token) {
        (Some(user), Some(token)) => Ok(AuthOutcome { user, token }),
        _ => Err(ChatDocError::Network(
            "auth response missing user or token".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn sample_user() -> serde_json::Value {
        serde_json::json!({
            "id": "u-1",
            "fullName": "Ada Lovelace",
            "email": "ada@example.com",
            "isActive": true
        })
    }

    fn sample_document(status: &str) -> serde_json::Value {
        serde_json::json!({
            "uuid": "d-1",
            "name": "paper.pdf",
            "size": 5 * 1024 * 1024,
            "size_mb": "5.00",
            "page_count": 42,
            "total_chunks": 120,
            "successful_chunks": 118,
            "indexing_status": status,
            "storage_url": "https://files.example.com/d-1.pdf",
            "storage_kind": "external"
        })
    }

    #[tokio::test]
    async fn sign_in_returns_identity_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/signin"))
            .and(body_json(serde_json::json!({
                "email": "ada@example.com",
                "password": "hunter2",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "user": sample_user(),
                "token": "tok-abc"
            })))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .sign_in("ada@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(outcome.token, "tok-abc");
        assert_eq!(outcome.user.full_name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn sign_in_failure_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "Invalid credentials"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .sign_in("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid credentials"));
    }

    #[tokio::test]
    async fn profile_rejection_is_distinct_from_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/profile"))
            .and(header("authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).fetch_profile("expired").await.unwrap_err();
        assert!(err.is_auth_rejection());
    }

    #[tokio::test]
    async fn profile_server_error_is_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/profile"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server).fetch_profile("tok").await.unwrap_err();
        assert!(!err.is_auth_rejection());
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn upload_decodes_document_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdf": sample_document("completed")
            })))
            .mount(&server)
            .await;

        let doc = client(&server)
            .upload_document("tok", "paper.pdf", vec![0x25, 0x50, 0x44, 0x46])
            .await
            .unwrap();
        assert_eq!(doc.uuid, "d-1");
        assert_eq!(doc.indexing_status, chatdoc_shared::IndexingStatus::Completed);
        assert_eq!(doc.successful_chunks, 118);
    }

    #[tokio::test]
    async fn non_2xx_with_unparseable_body_gets_generic_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .upload_document("tok", "paper.pdf", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn ask_carries_answer_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/ask/d-1"))
            .and(body_json(serde_json::json!({ "query": "what is this about?" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "answer": "It is about analytical engines.",
                "context_chunks_used": 3,
                "similarity_scores": [0.91, 0.85, 0.72],
                "chunks_metadata": [
                    { "chunk_index": "7", "similarity_score": 0.91 }
                ]
            })))
            .mount(&server)
            .await;

        let answer = client(&server)
            .ask("tok", "d-1", "what is this about?")
            .await
            .unwrap();
        assert!(answer.text.contains("analytical engines"));
        assert_eq!(answer.metadata.context_chunks_used, Some(3));
        assert_eq!(answer.metadata.similarity_scores.len(), 3);
        assert_eq!(answer.metadata.chunks[0].chunk_index, "7");
    }

    #[tokio::test]
    async fn ask_without_answer_field_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/ask/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true
            })))
            .mount(&server)
            .await;

        let err = client(&server).ask("tok", "d-1", "hm?").await.unwrap_err();
        assert!(err.to_string().contains("missing answer"));
    }

    #[tokio::test]
    async fn list_documents_decodes_all_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/pdf/list-pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdfs": [sample_document("completed"), sample_document("processing")]
            })))
            .mount(&server)
            .await;

        let docs = client(&server).list_documents("tok").await.unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn delete_document_acknowledges() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/pdf/d-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "success": true })),
            )
            .mount(&server)
            .await;

        client(&server).delete_document("tok", "d-1").await.unwrap();
    }
}
