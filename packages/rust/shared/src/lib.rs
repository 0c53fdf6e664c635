//! Shared types, error model, and configuration for the ChatDoc client.
//!
//! This crate is the foundation depended on by all other ChatDoc crates.
//! It provides:
//! - [`ChatDocError`] — the unified error type
//! - Domain types ([`Session`], [`DocumentRecord`], [`ChatMessage`])
//! - Configuration ([`AppConfig`], [`UploadConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendConfig, IndexingConfig, StorageConfig, UploadConfig, UploadPolicyConfig,
    config_dir, config_file_path, data_dir, init_config, load_config, load_config_from,
};
pub use error::{ChatDocError, Result};
pub use types::{
    AnswerMetadata, ChatMessage, ChunkDescriptor, DeliveryState, DocumentRecord,
    FallbackSessionRecord, IndexingStatus, MessageRole, Session, SessionProvenance, StorageKind,
    UserIdentity,
};
