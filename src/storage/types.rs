use serde::Serialize;
use thiserror::Error;

use crate::identity::Identity;

// ============================================================================
// Error Types
// ============================================================================

/// Store errors with user-facing messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Another podsync process appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A uniqueness, foreign-key or NOT NULL constraint rejected the write
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A transaction could not be started or committed; nothing was applied
    #[error("Transaction failed: {0}")]
    TransactionFailed(#[source] sqlx::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[source] sqlx::Error),
}

impl StoreError {
    /// Classifies a sqlx error, detecting lock contention and constraint failures.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err) {
            return StoreError::InstanceLocked;
        }

        if let sqlx::Error::Database(db_err) = &err {
            use sqlx::error::ErrorKind;
            match db_err.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    return StoreError::ConstraintViolation(db_err.message().to_string());
                }
                _ => {}
            }
        }

        StoreError::Other(err)
    }

    /// Classifies a failure to begin or commit a transaction.
    pub(crate) fn transaction(err: sqlx::Error) -> Self {
        if is_lock_error(&err) {
            StoreError::InstanceLocked
        } else {
            StoreError::TransactionFailed(err)
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_error(err: &sqlx::Error) -> bool {
    let error_string = err.to_string().to_lowercase();
    error_string.contains("database is locked")
        || error_string.contains("database table is locked")
        || error_string.contains("sqlite_busy")
        || error_string.contains("sqlite_locked")
        || error_string.contains("unable to open database file")
}

// ============================================================================
// Records
// ============================================================================

/// A subscribed podcast, keyed by the identity of its feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Show {
    pub id: Identity,
    pub feed_url: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    /// Unix seconds of the sync that last wrote this row
    pub last_synced_at: i64,
}

/// A playable episode belonging to one show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Episode {
    pub id: Identity,
    pub show_id: Identity,
    pub guid: String,
    pub title: String,
    /// Plain text, markup stripped
    pub description: String,
    /// Unix seconds; `None` when the feed gave no parseable date
    pub published_at: Option<i64>,
    /// `M:SS` / `H:MM:SS`, or empty when unknown
    pub duration: String,
    pub audio_url: String,
    pub audio_type: Option<String>,
    pub audio_length: Option<i64>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub link: Option<String>,
    pub last_synced_at: i64,
}
