//! Configuration management for logtail
//!
//! Defaults can be overridden by an optional TOML file, then by environment
//! variables, then by command-line flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TailError};

/// Global configuration for logtail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// File watching configuration
    pub watcher: WatcherConfig,
}

/// Configuration for file watching and reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Extension a file needs to be picked up by a directory watch
    pub log_extension: String,
    /// Emit the existing content of files found at startup
    pub from_start: bool,
    /// Upper bound on bytes consumed by a single read
    pub max_read_bytes: u64,
    /// Upper bound on a buffered line that has no newline yet
    pub max_partial_line_bytes: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            log_extension: "log".to_string(),
            from_start: false,
            max_read_bytes: 64 * 1024 * 1024,
            max_partial_line_bytes: 10 * 1024 * 1024,
        }
    }
}

impl TailConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// anything the file leaves out.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TailError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| TailError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Override with environment variables if present
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = std::env::var("LOGTAIL_EXTENSION") {
            if !val.is_empty() {
                self.watcher.log_extension = val;
            }
        }

        if let Ok(val) = std::env::var("LOGTAIL_FROM_START") {
            if let Ok(flag) = val.parse::<bool>() {
                self.watcher.from_start = flag;
            }
        }

        if let Ok(val) = std::env::var("LOGTAIL_MAX_READ_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.watcher.max_read_bytes = bytes;
            }
        }

        self
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let extension = self.watcher.log_extension.trim_start_matches('.');
        if extension.is_empty() {
            return Err(TailError::Config("log_extension must not be empty".to_string()));
        }

        if self.watcher.max_read_bytes == 0 {
            return Err(TailError::Config("max_read_bytes must be greater than 0".to_string()));
        }

        if self.watcher.max_partial_line_bytes == 0 {
            return Err(TailError::Config(
                "max_partial_line_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
