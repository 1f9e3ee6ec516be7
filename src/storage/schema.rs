use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_error, StoreError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the podcast catalog. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the catalog at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory catalog.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process has the
    /// database locked, `StoreError::Migration` if the schema could not be
    /// applied.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Restrict the catalog file to the owner before the pool creates it.
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(db_path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.exists()) {
                // If creation fails, SQLite reports the error at connect time.
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // The in-memory catalog uses shared cache, where concurrent writers
        // fail with SQLITE_LOCKED instead of waiting; one connection serializes them.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_error(&e) {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;

        tracing::debug!(path = %path, "Catalog opened");
        Ok(db)
    }

    /// Close the pool, waiting for in-flight queries to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Apply the schema in a single transaction. Every statement is
    /// `IF NOT EXISTS`, so re-running on an existing catalog is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shows (
                id TEXT PRIMARY KEY NOT NULL,
                feed_url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                author TEXT,
                image_url TEXT,
                link TEXT,
                language TEXT,
                last_synced_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY NOT NULL,
                show_id TEXT NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                published_at INTEGER,
                duration TEXT NOT NULL DEFAULT '',
                audio_url TEXT NOT NULL,
                audio_type TEXT,
                audio_length INTEGER,
                image_url TEXT,
                author TEXT,
                link TEXT,
                last_synced_at INTEGER NOT NULL,
                UNIQUE(show_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_episodes_show ON episodes(show_id)")
            .execute(&mut *tx)
            .await?;

        // Covers the newest-first episode listing per show
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_show_published ON episodes(show_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
