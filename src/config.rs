//! Configuration for opening a database: where it lives on disk, whether
//! field-level encryption is enabled, and how the file watcher debounces.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`crate::Database::open`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one `<collection>.json` file per collection.
    pub db_path: PathBuf,
    /// Secret used to derive the field-encryption key. Required if any
    /// registered entity type declares `SECRET_FIELDS`.
    pub cipher_secret: Option<String>,
    /// Debounce window for the external file watcher.
    pub watch_debounce: Duration,
    /// Disable the file watcher entirely (tests, sandboxes without inotify).
    pub watch_enabled: bool,
}

impl Config {
    /// Start a configuration rooted at `db_path`, with the defaults used
    /// throughout this crate's own tests and examples.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            cipher_secret: None,
            watch_debounce: Duration::from_millis(150),
            watch_enabled: true,
        }
    }

    pub fn with_cipher_secret(mut self, secret: impl Into<String>) -> Self {
        self.cipher_secret = Some(secret.into());
        self
    }

    pub fn with_watch_debounce(mut self, debounce: Duration) -> Self {
        self.watch_debounce = debounce;
        self
    }

    pub fn with_watch_enabled(mut self, enabled: bool) -> Self {
        self.watch_enabled = enabled;
        self
    }

    /// Load configuration from environment variables:
    /// `PARCHMENT_DB_PATH` (required), `PARCHMENT_CIPHER_SECRET` (optional),
    /// `PARCHMENT_WATCH_DEBOUNCE_MS` (optional, default 150).
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = env::var("PARCHMENT_DB_PATH").map_err(|_| ConfigError::MissingDbPath)?;
        let cipher_secret = env::var("PARCHMENT_CIPHER_SECRET").ok();
        let debounce_ms: u64 = env::var("PARCHMENT_WATCH_DEBOUNCE_MS")
            .unwrap_or_else(|_| "150".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidDebounce)?;

        Ok(Self {
            db_path: PathBuf::from(db_path),
            cipher_secret,
            watch_debounce: Duration::from_millis(debounce_ms),
            watch_enabled: true,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PARCHMENT_DB_PATH environment variable is required")]
    MissingDbPath,

    #[error("invalid PARCHMENT_WATCH_DEBOUNCE_MS value")]
    InvalidDebounce,
}
