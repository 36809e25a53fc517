//! Store configuration.

use std::path::{Path, PathBuf};

use crate::utils::default_database_path;

/// Path used to request a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Connection settings for a [`crate::Store`].
///
/// Parsed from environment variables by [`StoreConfig::from_env`] with
/// fallback defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Database file, or `:memory:`.
    pub path: PathBuf,
    /// Value for `PRAGMA cache_size` (pages when positive, KiB when negative).
    pub cache_size: i64,
    /// Value for `PRAGMA busy_timeout` in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            cache_size: 10_000,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Configuration for a database file at `path` with default tuning.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Configuration for a private in-memory database.
    pub fn memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    /// Returns true when the configuration targets an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    /// Parses configuration from environment variables.
    ///
    /// Falls back to defaults when env vars are not set or invalid.
    ///
    /// # Environment Variables
    ///
    /// - `PDFSTORE_DB_PATH` (path): database file location
    /// - `PDFSTORE_CACHE_SIZE` (i64, default 10000): page cache size
    /// - `PDFSTORE_BUSY_TIMEOUT_MS` (u32, default 5000): lock wait time
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let path = std::env::var("PDFSTORE_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.path);

        let cache_size = std::env::var("PDFSTORE_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cache_size);

        let busy_timeout_ms = std::env::var("PDFSTORE_BUSY_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.busy_timeout_ms);

        Self {
            path,
            cache_size,
            busy_timeout_ms,
        }
    }
}
