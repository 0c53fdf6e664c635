//! Document upload pipeline: validate → upload → await-index → ready.
//!
//! [`Uploader`] drives exactly one document at a time through the pipeline,
//! surfacing every outcome as state the UI can render. Displayed progress is
//! a timer-driven simulation held below completion until the transmission
//! settles; it must never be presented as a byte count.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use chatdoc_client::ApiClient;
use chatdoc_shared::{
    ChatDocError, DocumentRecord, IndexingStatus, Result, Session, UploadConfig,
};

/// Reported when the backend accepts the upload but cannot index it.
const INDEXING_FAILED: &str = "the backend failed to index the document";

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// A locally validated upload candidate.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// File name presented to the backend.
    pub name: String,
    pub size: u64,
}

/// Pipeline phase, for display and transition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Validated,
    Uploading,
    Indexing,
    Ready,
    Failed,
}

enum UploadState {
    Idle,
    Validated {
        file: CandidateFile,
    },
    Uploading {
        file: CandidateFile,
    },
    /// The backend accepted the bytes and is still indexing them.
    Indexing {
        file: CandidateFile,
        document: DocumentRecord,
    },
    Ready {
        document: DocumentRecord,
    },
    /// Validation, transport, or remote indexing failure. `file` is retained
    /// when a transmission already happened, so retry can re-send it.
    Failed {
        reason: String,
        file: Option<CandidateFile>,
    },
}

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

/// Drives one document through validate → upload → await-index → ready.
pub struct Uploader<'a> {
    client: &'a ApiClient,
    session: Session,
    config: UploadConfig,
    state: UploadState,
    progress: Arc<AtomicU8>,
    ticker: Option<JoinHandle<()>>,
    handoff_task: Option<JoinHandle<()>>,
    handoff_tx: mpsc::UnboundedSender<String>,
    handoff_rx: Option<mpsc::UnboundedReceiver<String>>,
    documents: Vec<DocumentRecord>,
}

impl<'a> Uploader<'a> {
    pub fn new(client: &'a ApiClient, session: Session, config: UploadConfig) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        Self {
            client,
            session,
            config,
            state: UploadState::Idle,
            progress: Arc::new(AtomicU8::new(0)),
            ticker: None,
            handoff_task: None,
            handoff_tx,
            handoff_rx: Some(handoff_rx),
            documents: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> UploadPhase {
        match &self.state {
            UploadState::Idle => UploadPhase::Idle,
            UploadState::Validated { .. } => UploadPhase::Validated,
            UploadState::Uploading { .. } => UploadPhase::Uploading,
            UploadState::Indexing { .. } => UploadPhase::Indexing,
            UploadState::Ready { .. } => UploadPhase::Ready,
            UploadState::Failed { .. } => UploadPhase::Failed,
        }
    }

    /// Simulated progress percentage (0–100).
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Shared progress handle for display tasks.
    pub fn progress_handle(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.progress)
    }

    /// The currently selected candidate, if one is retained.
    pub fn candidate(&self) -> Option<&CandidateFile> {
        match &self.state {
            UploadState::Validated { file }
            | UploadState::Uploading { file }
            | UploadState::Indexing { file, .. } => Some(file),
            UploadState::Failed { file, .. } => file.as_ref(),
            _ => None,
        }
    }

    /// The uploaded document record, once the backend has accepted it.
    pub fn document(&self) -> Option<&DocumentRecord> {
        match &self.state {
            UploadState::Indexing { document, .. } | UploadState::Ready { document } => {
                Some(document)
            }
            _ => None,
        }
    }

    /// The failure message when the pipeline is in the failed phase.
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            UploadState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Previously uploaded documents, refreshed after each accepted upload.
    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    /// Take the hand-off receiver. Yields the document identifier shortly
    /// after the pipeline reaches ready, so the user can read the success
    /// state before the conversation opens.
    pub fn take_handoff(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.handoff_rx.take()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Accept a candidate file, validating its media type and size. A
    /// violation moves the pipeline to failed without contacting the
    /// backend; selecting another file afterwards re-validates fresh.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn select(&mut self, path: &Path) -> Result<()> {
        if matches!(self.state, UploadState::Uploading { .. }) {
            return Err(ChatDocError::validation("an upload is already in progress"));
        }

        let media_type = mime_guess::from_path(path).first_or_octet_stream();
        if media_type != mime_guess::mime::APPLICATION_PDF {
            return Err(self.reject(format!(
                "only PDF files are accepted (got {media_type})"
            )));
        }

        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => return Err(self.reject(format!("cannot read {}: {e}", path.display()))),
        };
        if size > self.config.max_size_bytes {
            return Err(self.reject(format!(
                "file is {size} bytes, limit is {} bytes",
                self.config.max_size_bytes
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();

        debug!(name, size, "candidate validated");
        self.progress.store(0, Ordering::Relaxed);
        self.state = UploadState::Validated {
            file: CandidateFile {
                path: path.to_path_buf(),
                name,
                size,
            },
        };
        Ok(())
    }

    fn reject(&mut self, reason: String) -> ChatDocError {
        self.state = UploadState::Failed {
            reason: reason.clone(),
            file: None,
        };
        ChatDocError::validation(reason)
    }

    /// Transmit the validated candidate. The outcome — ready, indexing, or
    /// failed — is surfaced as state, not as an error.
    pub async fn upload(&mut self) -> Result<()> {
        let file = match std::mem::replace(&mut self.state, UploadState::Idle) {
            UploadState::Validated { file } => file,
            other => {
                self.state = other;
                return Err(ChatDocError::validation("no validated file to upload"));
            }
        };
        self.transmit(file).await;
        Ok(())
    }

    /// Re-attempt the failed transmission with the retained candidate.
    /// Does not re-validate.
    pub async fn retry(&mut self) -> Result<()> {
        let file = match std::mem::replace(&mut self.state, UploadState::Idle) {
            UploadState::Failed {
                file: Some(file), ..
            } => file,
            other => {
                self.state = other;
                return Err(ChatDocError::validation("no failed upload to retry"));
            }
        };
        self.transmit(file).await;
        Ok(())
    }

    #[instrument(skip_all, fields(name = %file.name, size = file.size))]
    async fn transmit(&mut self, file: CandidateFile) {
        self.state = UploadState::Uploading { file: file.clone() };
        self.start_ticker();

        let outcome = self.perform_upload(&file).await;

        // The timer must not outlive the transmission it decorates.
        self.settle_ticker();

        match outcome {
            Ok(document) => {
                // The new document is part of the listing now, whatever its
                // indexing status.
                self.refresh_documents().await;

                match document.indexing_status {
                    IndexingStatus::Completed => {
                        info!(document = %document.uuid, "document uploaded and indexed");
                        let id = document.uuid.clone();
                        self.state = UploadState::Ready { document };
                        self.schedule_handoff(id);
                    }
                    IndexingStatus::Processing => {
                        info!(document = %document.uuid, "document uploaded, indexing pending");
                        self.state = UploadState::Indexing { file, document };
                    }
                    IndexingStatus::Failed => {
                        warn!(document = %document.uuid, "backend reported indexing failure");
                        self.state = UploadState::Failed {
                            reason: INDEXING_FAILED.into(),
                            file: Some(file),
                        };
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "upload failed");
                self.state = UploadState::Failed {
                    reason: e.to_string(),
                    file: Some(file),
                };
            }
        }
    }

    async fn perform_upload(&self, file: &CandidateFile) -> Result<DocumentRecord> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| ChatDocError::io(&file.path, e))?;
        self.client
            .upload_document(&self.session.token, &file.name, bytes)
            .await
    }

    /// Poll the document's status until the backend reports a terminal
    /// outcome or the attempt budget is spent. Backoff doubles per attempt
    /// up to the configured ceiling; exhaustion is a terminal failure.
    #[instrument(skip_all)]
    pub async fn await_indexing(&mut self) -> Result<()> {
        let (file, document) = match &self.state {
            UploadState::Indexing { file, document } => (file.clone(), document.clone()),
            _ => return Err(ChatDocError::validation("no indexing in progress")),
        };

        let mut backoff = self.config.poll_initial_backoff;
        for attempt in 1..=self.config.poll_attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.poll_max_backoff);

            match self
                .client
                .document_info(&self.session.token, &document.uuid)
                .await
            {
                Ok(info) => match info.indexing_status {
                    IndexingStatus::Completed => {
                        info!(document = %info.uuid, attempt, "indexing completed");
                        let id = info.uuid.clone();
                        self.state = UploadState::Ready { document: info };
                        self.schedule_handoff(id);
                        return Ok(());
                    }
                    IndexingStatus::Failed => {
                        warn!(document = %info.uuid, "backend reported indexing failure");
                        self.state = UploadState::Failed {
                            reason: INDEXING_FAILED.into(),
                            file: Some(file),
                        };
                        return Ok(());
                    }
                    IndexingStatus::Processing => {
                        debug!(attempt, "still processing");
                    }
                },
                // Transient fetch failures consume an attempt but do not
                // abort the poll.
                Err(e) => warn!(attempt, error = %e, "status fetch failed during poll"),
            }
        }

        self.state = UploadState::Failed {
            reason: format!(
                "indexing did not complete after {} status checks",
                self.config.poll_attempts
            ),
            file: Some(file),
        };
        Ok(())
    }

    /// Clear the candidate and all derived state.
    pub fn reset(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        if let Some(handle) = self.handoff_task.take() {
            handle.abort();
        }
        if let Some(rx) = &mut self.handoff_rx {
            while rx.try_recv().is_ok() {}
        }
        self.progress.store(0, Ordering::Relaxed);
        self.state = UploadState::Idle;
    }

    /// Re-fetch the listing of previously uploaded documents. Failures are
    /// logged, never fatal to the pipeline.
    pub async fn refresh_documents(&mut self) {
        match self.client.list_documents(&self.session.token).await {
            Ok(docs) => {
                debug!(count = docs.len(), "document listing refreshed");
                self.documents = docs;
            }
            Err(e) => warn!(error = %e, "listing refresh failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn start_ticker(&mut self) {
        self.progress.store(0, Ordering::Relaxed);
        let progress = Arc::clone(&self.progress);
        let tick = self.config.progress_tick;
        let step = self.config.progress_step;
        let ceiling = self.config.progress_ceiling;

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let _ = progress.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                    (p < ceiling).then(|| p.saturating_add(step).min(ceiling))
                });
            }
        }));
    }

    fn settle_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        self.progress.store(100, Ordering::Relaxed);
    }

    fn schedule_handoff(&mut self, document_id: String) {
        let tx = self.handoff_tx.clone();
        let delay = self.config.handoff_delay;
        self.handoff_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(document_id);
        }));
    }
}

impl Drop for Uploader<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        if let Some(handle) = self.handoff_task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use chatdoc_shared::{SessionProvenance, UserIdentity};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_session() -> Session {
        Session {
            user: UserIdentity {
                id: "u-1".into(),
                full_name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                role: None,
                is_active: None,
                created_at: None,
                updated_at: None,
            },
            token: "tok".into(),
            provenance: SessionProvenance::Remote,
        }
    }

    fn test_config() -> UploadConfig {
        UploadConfig {
            max_size_bytes: 10 * 1024 * 1024,
            progress_tick: Duration::from_millis(20),
            progress_step: 10,
            progress_ceiling: 90,
            handoff_delay: Duration::from_millis(20),
            poll_attempts: 3,
            poll_initial_backoff: Duration::from_millis(10),
            poll_max_backoff: Duration::from_millis(40),
        }
    }

    fn api(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn write_pdf(dir: &std::path::Path, name: &str, size: usize) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(size.max(bytes.len()), 0);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("chatdoc-upload-test-{}", Uuid::now_v7()))
    }

    fn document_json(status: &str) -> serde_json::Value {
        serde_json::json!({
            "uuid": "d-1",
            "name": "paper.pdf",
            "size": 1024,
            "page_count": 3,
            "total_chunks": 9,
            "successful_chunks": 9,
            "indexing_status": status
        })
    }

    async fn mount_upload(server: &MockServer, status: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdf": document_json(status)
            })))
            .mount(server)
            .await;
    }

    async fn mount_listing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1/pdf/list-pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdfs": [document_json("completed")]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn rejects_non_pdf_without_contacting_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = temp_dir();
        std::fs::create_dir_all(&tmp).unwrap();
        let notes = tmp.join("notes.txt");
        std::fs::write(&notes, "plain text").unwrap();

        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());

        assert!(uploader.select(&notes).is_err());
        assert_eq!(uploader.phase(), UploadPhase::Failed);
        // Validation failures retain no payload to retry.
        assert!(uploader.retry().await.is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn rejects_oversize_file() {
        let server = MockServer::start().await;
        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "big.pdf", 2048);

        let client = api(&server);
        let mut config = test_config();
        config.max_size_bytes = 1024;
        let mut uploader = Uploader::new(&client, test_session(), config);

        let err = uploader.select(&pdf).unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert_eq!(uploader.phase(), UploadPhase::Failed);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn reselecting_replaces_the_candidate() {
        let server = MockServer::start().await;
        let tmp = temp_dir();
        let first = write_pdf(&tmp, "first.pdf", 100);
        let second = write_pdf(&tmp, "second.pdf", 200);

        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());

        uploader.select(&first).unwrap();
        uploader.select(&second).unwrap();
        assert_eq!(uploader.phase(), UploadPhase::Validated);
        assert_eq!(uploader.candidate().unwrap().name, "second.pdf");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn completed_upload_reaches_ready_and_hands_off() {
        let server = MockServer::start().await;
        mount_upload(&server, "completed").await;
        mount_listing(&server).await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());
        let mut handoff = uploader.take_handoff().unwrap();

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();

        assert_eq!(uploader.phase(), UploadPhase::Ready);
        assert_eq!(uploader.progress(), 100);
        assert_eq!(uploader.document().unwrap().uuid, "d-1");
        // The accepted upload refreshed the listing.
        assert_eq!(uploader.documents().len(), 1);

        let id = tokio::time::timeout(Duration::from_millis(500), handoff.recv())
            .await
            .expect("hand-off fired")
            .expect("channel open");
        assert_eq!(id, "d-1");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn processing_upload_surfaces_indexing_state() {
        let server = MockServer::start().await;
        mount_upload(&server, "processing").await;
        mount_listing(&server).await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();

        assert_eq!(uploader.phase(), UploadPhase::Indexing);
        assert_eq!(uploader.progress(), 100);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn await_indexing_polls_until_completed() {
        let server = MockServer::start().await;
        mount_upload(&server, "processing").await;
        mount_listing(&server).await;
        // First status check still processing, second completed.
        Mock::given(method("GET"))
            .and(path("/api/v1/pdf/info/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdf": document_json("processing")
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/pdf/info/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdf": document_json("completed")
            })))
            .mount(&server)
            .await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());
        let mut handoff = uploader.take_handoff().unwrap();

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();
        uploader.await_indexing().await.unwrap();

        assert_eq!(uploader.phase(), UploadPhase::Ready);
        let id = tokio::time::timeout(Duration::from_millis(500), handoff.recv())
            .await
            .expect("hand-off fired")
            .expect("channel open");
        assert_eq!(id, "d-1");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn await_indexing_gives_up_after_attempt_budget() {
        let server = MockServer::start().await;
        mount_upload(&server, "processing").await;
        mount_listing(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/pdf/info/d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdf": document_json("processing")
            })))
            .mount(&server)
            .await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();
        uploader.await_indexing().await.unwrap();

        assert_eq!(uploader.phase(), UploadPhase::Failed);
        assert!(uploader.failure().unwrap().contains("3 status checks"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn remote_indexing_failure_is_terminal_and_retryable() {
        let server = MockServer::start().await;
        mount_listing(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "pdf": document_json("failed")
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_upload(&server, "completed").await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();
        assert_eq!(uploader.phase(), UploadPhase::Failed);
        assert!(uploader.failure().unwrap().contains("index"));

        // Retry reuses the retained candidate without re-selection.
        uploader.retry().await.unwrap();
        assert_eq!(uploader.phase(), UploadPhase::Ready);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn transport_failure_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "message": "embedding service unavailable"
            })))
            .mount(&server)
            .await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();

        assert_eq!(uploader.phase(), UploadPhase::Failed);
        assert!(uploader.failure().unwrap().contains("embedding service unavailable"));
        assert!(uploader.candidate().is_some());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn progress_holds_ceiling_then_snaps_on_settle() {
        let server = MockServer::start().await;
        mount_listing(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/pdf/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "success": true,
                        "pdf": document_json("completed")
                    }))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut config = test_config();
        config.progress_tick = Duration::from_millis(10);
        config.progress_step = 30;
        let mut uploader = Uploader::new(&client, test_session(), config);

        let progress = uploader.progress_handle();
        let max_seen = Arc::new(AtomicU8::new(0));
        let sampler = {
            let max_seen = Arc::clone(&max_seen);
            tokio::spawn(async move {
                loop {
                    let p = progress.load(Ordering::Relaxed);
                    if p != 100 {
                        max_seen.fetch_max(p, Ordering::Relaxed);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();
        sampler.abort();

        // The simulation never claimed completion before the settle.
        assert!(max_seen.load(Ordering::Relaxed) <= 90);
        assert_eq!(uploader.progress(), 100);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn reset_returns_to_idle_and_cancels_handoff() {
        let server = MockServer::start().await;
        mount_upload(&server, "completed").await;
        mount_listing(&server).await;

        let tmp = temp_dir();
        let pdf = write_pdf(&tmp, "paper.pdf", 512);
        let client = api(&server);
        let mut config = test_config();
        config.handoff_delay = Duration::from_millis(200);
        let mut uploader = Uploader::new(&client, test_session(), config);
        let mut handoff = uploader.take_handoff().unwrap();

        uploader.select(&pdf).unwrap();
        uploader.upload().await.unwrap();
        assert_eq!(uploader.phase(), UploadPhase::Ready);

        uploader.reset();
        assert_eq!(uploader.phase(), UploadPhase::Idle);
        assert_eq!(uploader.progress(), 0);
        assert!(uploader.candidate().is_none());

        // The pending hand-off was aborted with the reset.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handoff.try_recv().is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn upload_without_validated_candidate_is_rejected() {
        let server = MockServer::start().await;
        let client = api(&server);
        let mut uploader = Uploader::new(&client, test_session(), test_config());
        assert!(uploader.upload().await.is_err());
        assert_eq!(uploader.phase(), UploadPhase::Idle);
    }
}
