//! Configuration file parser for ~/.config/podsync/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted but logged as likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::directory::{DEFAULT_DIRECTORY_URL, DEFAULT_SEARCH_LIMIT};
use crate::feed::DEFAULT_MAX_FEED_SIZE;
use crate::sync::{SyncOptions, DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_CONCURRENCY};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration. Any subset of keys may be given.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog location; `None` means `podsync.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Fetch gateway (`GET {gateway_url}?url=<feed>`). Feeds are fetched
    /// directly when unset.
    pub gateway_url: Option<String>,

    /// Per-feed fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Largest accepted feed body in bytes.
    pub max_feed_bytes: usize,

    /// Feeds refreshed in parallel by `refresh --all`.
    pub refresh_concurrency: usize,

    /// Allow direct fetches of localhost and private network addresses.
    pub allow_private_hosts: bool,

    /// Base URL of the iTunes-compatible search directory.
    pub directory_url: String,

    /// Default number of search results.
    pub search_limit: u32,

    /// How long search responses are reused, in minutes.
    pub search_cache_ttl_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            gateway_url: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
            allow_private_hosts: false,
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            search_cache_ttl_minutes: 15,
        }
    }
}

const KNOWN_KEYS: [&str; 9] = [
    "database_path",
    "gateway_url",
    "fetch_timeout_secs",
    "max_feed_bytes",
    "refresh_concurrency",
    "allow_private_hosts",
    "directory_url",
    "search_limit",
    "search_cache_ttl_minutes",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file is never loaded
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            gateway = config.gateway_url.as_deref().unwrap_or("(direct)"),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            refresh_concurrency: self.refresh_concurrency,
        }
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_minutes.saturating_mul(60))
    }
}

// ============================================================================
// Tests
// ============================================================================
