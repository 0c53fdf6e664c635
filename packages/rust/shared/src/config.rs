//! Application configuration for the ChatDoc client.
//!
//! User config lives at `~/.chatdoc/chatdoc.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatDocError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "chatdoc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".chatdoc";

// ---------------------------------------------------------------------------
// Config structs (matching chatdoc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Upload pipeline settings.
    #[serde(default)]
    pub upload: UploadPolicyConfig,

    /// Indexing poll settings.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Local storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[backend]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the ChatDoc backend API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout ceiling in seconds. A hung request surfaces as a
    /// transport failure instead of waiting forever.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".into()
}
fn default_request_timeout() -> u64 {
    30
}

/// `[upload]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicyConfig {
    /// Maximum accepted file size in megabytes.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Cadence of the simulated progress timer, in milliseconds.
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,

    /// Amount each tick adds to the displayed percentage.
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,

    /// Ceiling the simulation holds at until the transmission settles.
    #[serde(default = "default_progress_ceiling")]
    pub progress_ceiling: u8,

    /// Delay before an indexed document is handed off to the conversation,
    /// in milliseconds.
    #[serde(default = "default_handoff_delay_ms")]
    pub handoff_delay_ms: u64,
}

impl Default for UploadPolicyConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            progress_tick_ms: default_progress_tick_ms(),
            progress_step: default_progress_step(),
            progress_ceiling: default_progress_ceiling(),
            handoff_delay_ms: default_handoff_delay_ms(),
        }
    }
}

fn default_max_size_mb() -> u64 {
    10
}
fn default_progress_tick_ms() -> u64 {
    200
}
fn default_progress_step() -> u8 {
    10
}
fn default_progress_ceiling() -> u8 {
    90
}
fn default_handoff_delay_ms() -> u64 {
    2500
}

/// `[indexing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Maximum status fetches before the poll gives up.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Initial delay between status fetches, in milliseconds.
    #[serde(default = "default_poll_initial_backoff_ms")]
    pub poll_initial_backoff_ms: u64,

    /// Upper bound on the backoff delay, in milliseconds.
    #[serde(default = "default_poll_max_backoff_ms")]
    pub poll_max_backoff_ms: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_initial_backoff_ms: default_poll_initial_backoff_ms(),
            poll_max_backoff_ms: default_poll_max_backoff_ms(),
        }
    }
}

fn default_poll_attempts() -> u32 {
    10
}
fn default_poll_initial_backoff_ms() -> u64 {
    1000
}
fn default_poll_max_backoff_ms() -> u64 {
    15_000
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the local database. `~/.chatdoc` when empty.
    #[serde(default)]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upload config (runtime, merged from config file)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration with durations resolved.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes.
    pub max_size_bytes: u64,
    /// Cadence of the simulated progress timer.
    pub progress_tick: Duration,
    /// Amount each tick adds to the displayed percentage.
    pub progress_step: u8,
    /// Ceiling the simulation holds at until the transmission settles.
    pub progress_ceiling: u8,
    /// Delay before the ready hand-off fires.
    pub handoff_delay: Duration,
    /// Maximum status fetches before the indexing poll gives up.
    pub poll_attempts: u32,
    /// Initial poll backoff.
    pub poll_initial_backoff: Duration,
    /// Upper bound on the poll backoff.
    pub poll_max_backoff: Duration,
}

impl From<&AppConfig> for UploadConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_size_bytes: config.upload.max_size_mb * 1024 * 1024,
            progress_tick: Duration::from_millis(config.upload.progress_tick_ms),
            progress_step: config.upload.progress_step,
            progress_ceiling: config.upload.progress_ceiling.min(99),
            handoff_delay: Duration::from_millis(config.upload.handoff_delay_ms),
            poll_attempts: config.indexing.poll_attempts,
            poll_initial_backoff: Duration::from_millis(config.indexing.poll_initial_backoff_ms),
            poll_max_backoff: Duration::from_millis(config.indexing.poll_max_backoff_ms),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.chatdoc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ChatDocError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.chatdoc/chatdoc.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the data directory for local persistence.
pub fn data_dir(config: &AppConfig) -> Result<PathBuf> {
    if config.storage.data_dir.is_empty() {
        config_dir()
    } else {
        Ok(PathBuf::from(&config.storage.data_dir))
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ChatDocError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ChatDocError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ChatDocError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ChatDocError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ChatDocError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
