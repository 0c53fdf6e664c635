//! Core orchestration for the ChatDoc client: the document upload pipeline
//! and the per-document conversation engine.

pub mod chat;
pub mod upload;

pub use chat::Conversation;
pub use upload::{CandidateFile, UploadPhase, Uploader};
