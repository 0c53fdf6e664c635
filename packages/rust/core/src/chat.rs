//! Conversation engine: one ordered transcript per document.
//!
//! [`Conversation`] appends the user's question optimistically, then
//! resolves the exchange into either an answer or a visible error notice.
//! Exchanges are serialized — one outstanding ask at a time — so transcript
//! order is exactly call order.

use tracing::{debug, instrument, warn};

use chatdoc_client::ApiClient;
use chatdoc_shared::{
    ChatDocError, ChatMessage, DeliveryState, DocumentRecord, Result, Session,
};

/// Maintains the transcript and performs the ask/answer exchange for one
/// document at a time.
pub struct Conversation<'a> {
    client: &'a ApiClient,
    session: Session,
    document: Option<DocumentRecord>,
    transcript: Vec<ChatMessage>,
    awaiting: bool,
    error: Option<String>,
}

impl<'a> Conversation<'a> {
    pub fn new(client: &'a ApiClient, session: Session) -> Self {
        Self {
            client,
            session,
            document: None,
            transcript: Vec::new(),
            awaiting: false,
            error: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn document(&self) -> Option<&DocumentRecord> {
        self.document.as_ref()
    }

    /// Whether an exchange is in flight.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    /// The error that prevented the conversation from opening, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Open a conversation for `document_id`. Any previous transcript is
    /// discarded first, so a failed open never shows another document's
    /// messages.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn open(&mut self, document_id: &str) -> Result<()> {
        self.document = None;
        self.transcript.clear();
        self.error = None;
        self.awaiting = false;

        match self
            .client
            .document_info(&self.session.token, document_id)
            .await
        {
            Ok(document) => {
                debug!(name = %document.name, "conversation opened");
                self.transcript
                    .push(ChatMessage::assistant(welcome_text(&document), None));
                self.document = Some(document);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to open conversation");
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Ask a question. Empty input and in-flight exchanges are no-ops; every
    /// performed exchange grows the transcript by exactly one user and one
    /// assistant entry, on both success and failure.
    #[instrument(skip_all)]
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() || self.awaiting {
            return Ok(());
        }
        let Some(document) = self.document.clone() else {
            return Err(ChatDocError::validation("no document open"));
        };

        // Optimistic append before the request resolves.
        self.transcript.push(ChatMessage::user(text));
        self.awaiting = true;

        let outcome = self
            .client
            .ask(&self.session.token, &document.uuid, text)
            .await;

        if let Some(question) = self.transcript.last_mut() {
            question.delivery = match &outcome {
                Ok(_) => DeliveryState::Confirmed,
                Err(_) => DeliveryState::Errored,
            };
        }

        match outcome {
            Ok(answer) => {
                debug!(chunks = ?answer.metadata.context_chunks_used, "answer appended");
                self.transcript
                    .push(ChatMessage::assistant(answer.text, Some(answer.metadata)));
            }
            Err(e) => {
                warn!(error = %e, "exchange failed");
                self.transcript.push(ChatMessage::error_notice(&e));
            }
        }

        self.awaiting = false;
        Ok(())
    }
}

fn welcome_text(document: &DocumentRecord) -> String {
    format!(
        "Hello! I'm ready to help you with questions about \"{}\". \
         This document has {} pages and {} indexed chunks. \
         What would you like to know?",
        document.name, document.page_count, document.successful_chunks
    )
}
