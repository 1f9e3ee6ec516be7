use sqlx::QueryBuilder;

use super::schema::Database;
use super::shows::upsert_show_on;
use super::types::{Episode, Show, StoreError};
use crate::identity::Identity;

const EPISODE_COLUMNS: &str = "id, show_id, guid, title, description, published_at, duration, \
     audio_url, audio_type, audio_length, image_url, author, link, last_synced_at";

/// Overwrites every non-identity column from the incoming row.
const EPISODE_ON_CONFLICT: &str = " ON CONFLICT(id) DO UPDATE SET \
     show_id = excluded.show_id, \
     guid = excluded.guid, \
     title = excluded.title, \
     description = excluded.description, \
     published_at = excluded.published_at, \
     duration = excluded.duration, \
     audio_url = excluded.audio_url, \
     audio_type = excluded.audio_type, \
     audio_length = excluded.audio_length, \
     image_url = excluded.image_url, \
     author = excluded.author, \
     link = excluded.link, \
     last_synced_at = excluded.last_synced_at";

/// 14 columns * 50 rows stays under SQLite's 999 bound-parameter limit.
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Episode Operations
    // ========================================================================

    /// Insert the episode, or overwrite the existing row with the same id.
    ///
    /// Fails with `StoreError::ConstraintViolation` if the parent show does
    /// not exist.
    pub async fn upsert_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_episodes_on(&mut *conn, std::slice::from_ref(episode)).await
    }

    /// Write one sync result: the show and all of its episodes, atomically.
    ///
    /// Episodes absent from `episodes` are left untouched. Returns how many
    /// of `episodes` did not exist before.
    pub async fn apply_sync(&self, show: &Show, episodes: &[Episode]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::transaction)?;

        upsert_show_on(&mut *tx, show).await?;

        let before = count_episodes_on(&mut *tx, &show.id).await?;
        upsert_episodes_on(&mut *tx, episodes).await?;
        let after = count_episodes_on(&mut *tx, &show.id).await?;

        tx.commit().await.map_err(StoreError::transaction)?;

        let inserted = after.saturating_sub(before) as usize;
        tracing::debug!(
            feed = %show.feed_url,
            episodes = episodes.len(),
            inserted,
            "Sync applied"
        );
        Ok(inserted)
    }

    // ========================================================================
    // Episode Queries
    // ========================================================================

    /// Episodes of a show, newest first; episodes without a date come last.
    pub async fn get_episodes_by_show(&self, show_id: &Identity) -> Result<Vec<Episode>, StoreError> {
        let episodes = sqlx::query_as::<_, Episode>(&format!(
            r#"
            SELECT {EPISODE_COLUMNS}
            FROM episodes
            WHERE show_id = ?
            ORDER BY (published_at IS NULL), published_at DESC, guid
        "#
        ))
        .bind(show_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(episodes)
    }

    pub async fn get_episode(&self, id: &Identity) -> Result<Option<Episode>, StoreError> {
        let episode =
            sqlx::query_as::<_, Episode>(&format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(episode)
    }
}

async fn count_episodes_on(
    conn: &mut sqlx::SqliteConnection,
    show_id: &Identity,
) -> Result<i64, StoreError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes WHERE show_id = ?")
        .bind(show_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

async fn upsert_episodes_on(
    conn: &mut sqlx::SqliteConnection,
    episodes: &[Episode],
) -> Result<(), StoreError> {
    for chunk in episodes.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("INSERT INTO episodes ({EPISODE_COLUMNS}) "));

        builder.push_values(chunk, |mut b, ep| {
            b.push_bind(&ep.id)
                .push_bind(&ep.show_id)
                .push_bind(&ep.guid)
                .push_bind(&ep.title)
                .push_bind(&ep.description)
                .push_bind(ep.published_at)
                .push_bind(&ep.duration)
                .push_bind(&ep.audio_url)
                .push_bind(&ep.audio_type)
                .push_bind(ep.audio_length)
                .push_bind(&ep.image_url)
                .push_bind(&ep.author)
                .push_bind(&ep.link)
                .push_bind(ep.last_synced_at);
        });
        builder.push(EPISODE_ON_CONFLICT);

        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::identity::{episode_id, show_id};
    use crate::storage::{Database, Episode, Show, StoreError};
    use pretty_assertions::assert_eq;

    const FEED: &str = "https://pod.example.com/feed.xml";

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_show(title: &str) -> Show {
        Show {
            id: show_id(FEED),
            feed_url: FEED.to_string(),
            title: title.to_string(),
            description: None,
            author: Some("Host".to_string()),
            image_url: None,
            link: Some("https://pod.example.com".to_string()),
            language: None,
            last_synced_at: 1704067200,
        }
    }

    fn test_episode(guid: &str, published_at: Option<i64>) -> Episode {
        Episode {
            id: episode_id(guid, FEED),
            show_id: show_id(FEED),
            guid: guid.to_string(),
            title: format!("Episode {guid}"),
            description: "Notes".to_string(),
            published_at,
            duration: "2:05".to_string(),
            audio_url: format!("https://cdn.example.com/{guid}.mp3"),
            audio_type: Some("audio/mpeg".to_string()),
            audio_length: Some(1024),
            image_url: None,
            author: None,
            link: None,
            last_synced_at: 1704067200,
        }
    }

    #[tokio::test]
    async fn test_apply_sync_counts_new_episodes() {
        let db = test_db().await;

        let inserted = db
            .apply_sync(
                &test_show("Pod"),
                &[test_episode("a", Some(100)), test_episode("b", Some(200))],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let inserted = db
            .apply_sync(
                &test_show("Pod"),
                &[test_episode("b", Some(200)), test_episode("c", Some(300))],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_apply_sync_keeps_missing_episodes() {
        let db = test_db().await;
        db.apply_sync(&test_show("Pod"), &[test_episode("old", Some(100))])
            .await
            .unwrap();
        db.apply_sync(&test_show("Pod"), &[test_episode("new", Some(200))])
            .await
            .unwrap();

        let guids: Vec<String> = db
            .get_episodes_by_show(&show_id(FEED))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.guid)
            .collect();
        assert_eq!(guids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_apply_sync_overwrites_fields() {
        let db = test_db().await;
        db.apply_sync(&test_show("Pod"), &[test_episode("a", Some(100))])
            .await
            .unwrap();

        let mut changed = test_episode("a", None);
        changed.title = "Renamed".to_string();
        changed.audio_type = None;
        db.apply_sync(&test_show("Pod v2"), &[changed.clone()])
            .await
            .unwrap();

        assert_eq!(
            db.get_episode(&episode_id("a", FEED)).await.unwrap(),
            Some(changed)
        );
        assert_eq!(
            db.get_show_by_feed_url(FEED).await.unwrap().unwrap().title,
            "Pod v2"
        );
    }

    #[tokio::test]
    async fn test_apply_sync_large_batch() {
        let db = test_db().await;
        let episodes: Vec<Episode> = (0..130)
            .map(|i| test_episode(&format!("ep-{i}"), Some(i)))
            .collect();

        let inserted = db.apply_sync(&test_show("Pod"), &episodes).await.unwrap();
        assert_eq!(inserted, 130);
        assert_eq!(
            db.get_episodes_by_show(&show_id(FEED)).await.unwrap().len(),
            130
        );
    }

    #[tokio::test]
    async fn test_apply_sync_is_atomic() {
        let db = test_db().await;

        // Second episode points at a show that does not exist
        let mut orphan = test_episode("orphan", None);
        orphan.show_id = show_id("https://other.example/feed");

        let result = db
            .apply_sync(&test_show("Pod"), &[test_episode("a", Some(1)), orphan])
            .await;
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));

        assert!(!db.exists_by_feed_url(FEED).await.unwrap());
        assert!(db.get_episode(&episode_id("a", FEED)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_episode_requires_show() {
        let db = test_db().await;
        let result = db.upsert_episode(&test_episode("a", None)).await;
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_episodes_newest_first_undated_last() {
        let db = test_db().await;
        db.apply_sync(
            &test_show("Pod"),
            &[
                test_episode("undated", None),
                test_episode("old", Some(100)),
                test_episode("new", Some(300)),
                test_episode("mid", Some(200)),
            ],
        )
        .await
        .unwrap();

        let guids: Vec<String> = db
            .get_episodes_by_show(&show_id(FEED))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.guid)
            .collect();
        assert_eq!(guids, vec!["new", "mid", "old", "undated"]);
    }

    #[tokio::test]
    async fn test_get_episode_missing() {
        let db = test_db().await;
        assert!(db
            .get_episode(&episode_id("nope", FEED))
            .await
            .unwrap()
            .is_none());
    }
}
