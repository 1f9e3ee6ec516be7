use super::schema::Database;
use super::types::{Show, StoreError};

const SHOW_COLUMNS: &str =
    "id, feed_url, title, description, author, image_url, link, language, last_synced_at";

impl Database {
    // ========================================================================
    // Show Operations
    // ========================================================================

    /// Insert the show, or overwrite every field of the existing row with the same id.
    pub async fn upsert_show(&self, show: &Show) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_show_on(&mut *conn, show).await
    }

    /// All shows, ordered by title.
    pub async fn get_all_shows(&self) -> Result<Vec<Show>, StoreError> {
        let shows = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows ORDER BY title COLLATE NOCASE, feed_url"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(shows)
    }

    pub async fn get_show_by_feed_url(&self, feed_url: &str) -> Result<Option<Show>, StoreError> {
        let show = sqlx::query_as::<_, Show>(&format!(
            "SELECT {SHOW_COLUMNS} FROM shows WHERE feed_url = ?"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(show)
    }

    pub async fn exists_by_feed_url(&self, feed_url: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM shows WHERE feed_url = ?)")
                .bind(feed_url)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Delete the show at `feed_url` together with all of its episodes.
    ///
    /// Both deletes run in one transaction: if either fails, neither takes
    /// effect. Returns the number of episodes removed (0 when the show did
    /// not exist).
    pub async fn delete_show_cascade(&self, feed_url: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::transaction)?;

        let episodes = sqlx::query(
            "DELETE FROM episodes WHERE show_id IN (SELECT id FROM shows WHERE feed_url = ?)",
        )
        .bind(feed_url)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let shows = sqlx::query("DELETE FROM shows WHERE feed_url = ?")
            .bind(feed_url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.map_err(StoreError::transaction)?;

        tracing::debug!(feed = %feed_url, shows, episodes, "Cascade delete committed");
        Ok(episodes)
    }
}

/// Show upsert on an existing connection or transaction.
pub(crate) async fn upsert_show_on(
    conn: &mut sqlx::SqliteConnection,
    show: &Show,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO shows (id, feed_url, title, description, author, image_url, link, language, last_synced_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            feed_url = excluded.feed_url,
            title = excluded.title,
            description = excluded.description,
            author = excluded.author,
            image_url = excluded.image_url,
            link = excluded.link,
            language = excluded.language,
            last_synced_at = excluded.last_synced_at
    "#,
    )
    .bind(&show.id)
    .bind(&show.feed_url)
    .bind(&show.title)
    .bind(&show.description)
    .bind(&show.author)
    .bind(&show.image_url)
    .bind(&show.link)
    .bind(&show.language)
    .bind(show.last_synced_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
