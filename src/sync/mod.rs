//! Subscription lifecycle: fetch, parse, derive identities and store.
//!
//! [`SyncEngine`] owns no global state. It is built from a [`Database`], a
//! [`FeedSource`] and [`SyncOptions`] and can be shared across tasks by
//! reference or `Arc`.
//!
//! [`Database`]: crate::storage::Database
//! [`FeedSource`]: crate::feed::FeedSource

mod engine;
mod guard;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchError, ParseError};
use crate::storage::{Episode, Show, StoreError};

pub use engine::SyncEngine;

/// Default time allowed for a single feed fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of feeds refreshed concurrently by `refresh_all`
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 10;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound on one fetch; expiry aborts the sync before any write
    pub fetch_timeout: Duration,
    /// Parallelism of `refresh_all`
    pub refresh_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
        }
    }
}

/// The caller-facing operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Subscribe,
    Refresh,
    Unsubscribe,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Subscribe => f.write_str("subscribe"),
            SyncAction::Refresh => f.write_str("refresh"),
            SyncAction::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

/// A failed sync, tagged with the operation and the stage that failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not {action}: invalid feed URL: {reason}")]
    InvalidFeedUrl { action: SyncAction, reason: String },

    #[error("could not {action}: fetch failed: {source}")]
    Fetch {
        action: SyncAction,
        #[source]
        source: FetchError,
    },

    #[error("could not {action}: feed parse failed: {source}")]
    Parse {
        action: SyncAction,
        #[source]
        source: ParseError,
    },

    #[error("could not {action}: storage failed: {source}")]
    Store {
        action: SyncAction,
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    pub fn action(&self) -> SyncAction {
        match self {
            SyncError::InvalidFeedUrl { action, .. }
            | SyncError::Fetch { action, .. }
            | SyncError::Parse { action, .. }
            | SyncError::Store { action, .. } => *action,
        }
    }
}

/// What one subscribe or refresh wrote.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub show: Show,
    /// Every valid episode of the fetched document, in document order
    pub episodes: Vec<Episode>,
    /// How many of `episodes` were not in the catalog before
    pub new_episodes: usize,
    /// Items dropped by the parser (no identifier, no audio, duplicate guid)
    pub skipped: usize,
}

/// Per-feed result of [`SyncEngine::refresh_all`].
#[derive(Debug)]
pub struct RefreshResult {
    pub feed_url: String,
    pub result: Result<SyncOutcome, SyncError>,
}
