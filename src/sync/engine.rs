use futures::stream::{self, StreamExt};
use tokio::time::timeout;

use super::guard::FeedLocks;
use super::{RefreshResult, SyncAction, SyncError, SyncOptions, SyncOutcome};
use crate::feed::{self, Feed, FeedSource, FetchError, ParseError};
use crate::identity::{episode_id, show_id};
use crate::storage::{Database, Episode, Show};
use crate::util::validate_url;

/// Keeps the catalog in step with remote feeds.
///
/// Every operation on a given feed URL runs under that URL's lock, so two
/// overlapping subscribes of the same feed cannot interleave their writes.
/// Nothing is retried; a failed stage is reported to the caller as-is.
pub struct SyncEngine<S> {
    db: Database,
    source: S,
    options: SyncOptions,
    locks: FeedLocks,
}

impl<S: FeedSource> SyncEngine<S> {
    pub fn new(db: Database, source: S, options: SyncOptions) -> Self {
        Self {
            db,
            source,
            options,
            locks: FeedLocks::default(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Subscribe to the feed at `feed_url`.
    ///
    /// Subscribing to a feed that is already in the catalog is a refresh;
    /// it never creates a second show. Errors then carry
    /// [`SyncAction::Refresh`].
    pub async fn subscribe(&self, feed_url: &str) -> Result<SyncOutcome, SyncError> {
        let feed_url = check_feed_url(SyncAction::Subscribe, feed_url)?;
        let _guard = self.locks.acquire(feed_url).await;

        let subscribed = self
            .db
            .exists_by_feed_url(feed_url)
            .await
            .map_err(|source| SyncError::Store {
                action: SyncAction::Subscribe,
                source,
            })?;

        let action = if subscribed {
            tracing::debug!(feed = %feed_url, "Already subscribed, refreshing instead");
            SyncAction::Refresh
        } else {
            SyncAction::Subscribe
        };
        self.sync_locked(action, feed_url).await
    }

    /// Re-fetch the feed and overwrite the show and every episode it lists.
    ///
    /// Episodes that disappeared from the feed stay in the catalog.
    pub async fn refresh(&self, feed_url: &str) -> Result<SyncOutcome, SyncError> {
        let feed_url = check_feed_url(SyncAction::Refresh, feed_url)?;
        let _guard = self.locks.acquire(feed_url).await;
        self.sync_locked(SyncAction::Refresh, feed_url).await
    }

    /// Remove the show and all of its episodes.
    ///
    /// Returns the number of episodes removed, or `None` if the feed was not
    /// subscribed.
    pub async fn unsubscribe(&self, feed_url: &str) -> Result<Option<u64>, SyncError> {
        let action = SyncAction::Unsubscribe;
        let feed_url = feed_url.trim();
        let _guard = self.locks.acquire(feed_url).await;
        let store_err = |source| SyncError::Store { action, source };

        if !self.db.exists_by_feed_url(feed_url).await.map_err(store_err)? {
            return Ok(None);
        }

        let removed = self
            .db
            .delete_show_cascade(feed_url)
            .await
            .map_err(store_err)?;
        tracing::info!(feed = %feed_url, episodes = removed, "Unsubscribed");
        Ok(Some(removed))
    }

    /// Refresh every show in the catalog.
    ///
    /// Up to `refresh_concurrency` feeds are in flight at once. A failing
    /// feed does not stop the others; each gets its own [`RefreshResult`].
    pub async fn refresh_all(&self) -> Result<Vec<RefreshResult>, SyncError> {
        let shows = self
            .db
            .get_all_shows()
            .await
            .map_err(|source| SyncError::Store {
                action: SyncAction::Refresh,
                source,
            })?;

        if shows.is_empty() {
            return Ok(Vec::new());
        }

        let total = shows.len();
        let results: Vec<RefreshResult> = stream::iter(shows)
            .map(|show| async move {
                let result = self.refresh(&show.feed_url).await;
                if let Err(e) = &result {
                    tracing::warn!(feed = %show.feed_url, error = %e, "Refresh failed");
                }
                RefreshResult {
                    feed_url: show.feed_url,
                    result,
                }
            })
            .buffer_unordered(self.options.refresh_concurrency.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.result.is_err()).count();
        tracing::info!(total, failed, "Refresh of all shows finished");
        Ok(results)
    }

    /// Fetch, parse and store. The caller holds the feed's lock.
    async fn sync_locked(
        &self,
        action: SyncAction,
        feed_url: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let bytes = match timeout(self.options.fetch_timeout, self.source.fetch(feed_url)).await {
            Ok(fetched) => fetched.map_err(|source| SyncError::Fetch { action, source })?,
            Err(_) => {
                tracing::warn!(
                    feed = %feed_url,
                    timeout_ms = self.options.fetch_timeout.as_millis() as u64,
                    "Fetch timed out"
                );
                return Err(SyncError::Fetch {
                    action,
                    source: FetchError::Timeout,
                });
            }
        };

        // Parsing is CPU-bound; keep it off the async workers
        let parsed = tokio::task::spawn_blocking(move || feed::parse(&bytes))
            .await
            .map_err(|e| SyncError::Parse {
                action,
                source: ParseError::Malformed(format!("parser task failed: {e}")),
            })?;
        let feed = parsed.map_err(|source| SyncError::Parse { action, source })?;

        let dialect = feed.dialect;
        let skipped = feed.skipped;
        let (show, episodes) = into_records(feed_url, feed, chrono::Utc::now().timestamp());

        let new_episodes = self
            .db
            .apply_sync(&show, &episodes)
            .await
            .map_err(|source| SyncError::Store { action, source })?;

        tracing::info!(
            feed = %feed_url,
            %action,
            %dialect,
            episodes = episodes.len(),
            new_episodes,
            skipped,
            "Feed synced"
        );

        Ok(SyncOutcome {
            show,
            episodes,
            new_episodes,
            skipped,
        })
    }
}

/// Trims `feed_url` and checks its shape. The trimmed form is the one that
/// gets hashed, locked and stored.
fn check_feed_url(action: SyncAction, feed_url: &str) -> Result<&str, SyncError> {
    let feed_url = feed_url.trim();
    // Only the shape is checked here; the feed source applies its own host policy
    validate_url(feed_url, true)
        .map(|_| feed_url)
        .map_err(|e| SyncError::InvalidFeedUrl {
            action,
            reason: e.to_string(),
        })
}

/// Canonical records for one parsed document.
fn into_records(feed_url: &str, feed: Feed, synced_at: i64) -> (Show, Vec<Episode>) {
    let id = show_id(feed_url);

    let episodes = feed
        .items
        .into_iter()
        .map(|item| Episode {
            id: episode_id(&item.guid, feed_url),
            show_id: id.clone(),
            guid: item.guid,
            title: item.title,
            description: item.description,
            published_at: item.published_at,
            duration: item.duration,
            audio_url: item.enclosure.url,
            audio_type: item.enclosure.mime_type,
            audio_length: item.enclosure.length,
            image_url: item.image_url,
            author: item.author,
            link: item.link,
            last_synced_at: synced_at,
        })
        .collect();

    let title = if feed.title.is_empty() {
        feed_url.to_owned()
    } else {
        feed.title
    };

    let show = Show {
        id,
        feed_url: feed_url.to_owned(),
        title,
        description: feed.description,
        author: feed.author,
        image_url: feed.image_url,
        link: feed.link,
        language: feed.language,
        last_synced_at: synced_at,
    };

    (show, episodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::show_id;
    use crate::storage::StoreError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const FEED: &str = "https://pod.example.com/feed.xml";

    /// Serves fixed bodies from memory; unknown URLs get a 404.
    #[derive(Default)]
    struct StaticSource {
        bodies: Mutex<HashMap<String, String>>,
        delay: Duration,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StaticSource {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn serve(&self, url: &str, body: impl Into<String>) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.into());
        }

        fn remove(&self, url: &str) {
            self.bodies.lock().unwrap().remove(url);
        }
    }

    #[async_trait]
    impl FeedSource for StaticSource {
        async fn fetch(&self, feed_url: &str) -> Result<Vec<u8>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let body = self.bodies.lock().unwrap().get(feed_url).cloned();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            body.map(String::into_bytes)
                .ok_or(FetchError::NonSuccessStatus(404))
        }
    }

    fn rss(title: &str, guids: &[&str]) -> String {
        let items: String = guids
            .iter()
            .map(|g| {
                format!(
                    r#"<item><guid>{g}</guid><title>Episode {g}</title>
                       <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
                       <itunes:duration>125</itunes:duration>
                       <enclosure url="http://cdn.example.com/{g}.mp3" type="audio/mpeg" length="100"/></item>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"><channel>
<title>{title}</title><description>About {title}</description>
{items}
</channel></rss>"#
        )
    }

    async fn engine_with(source: StaticSource, options: SyncOptions) -> SyncEngine<StaticSource> {
        let db = Database::open(":memory:").await.unwrap();
        SyncEngine::new(db, source, options)
    }

    async fn engine() -> SyncEngine<StaticSource> {
        engine_with(StaticSource::default(), SyncOptions::default()).await
    }

    /// Catalog contents with sync timestamps cleared.
    async fn snapshot(db: &Database) -> (Vec<Show>, Vec<Episode>) {
        let mut shows = db.get_all_shows().await.unwrap();
        let mut episodes = Vec::new();
        for show in &mut shows {
            for mut ep in db.get_episodes_by_show(&show.id).await.unwrap() {
                ep.last_synced_at = 0;
                episodes.push(ep);
            }
            show.last_synced_at = 0;
        }
        (shows, episodes)
    }

    #[tokio::test]
    async fn test_subscribe_stores_show_and_episodes() {
        let engine = engine().await;
        engine.source().serve(
            FEED,
            r#"<rss><channel><title>Show A</title><item><guid>e1</guid><enclosure url="http://x/a.mp3" type="audio/mpeg" length="100"/></item><item><guid>e2</guid><title>no audio</title></item></channel></rss>"#,
        );

        let outcome = engine.subscribe(FEED).await.unwrap();
        assert_eq!(outcome.show.title, "Show A");
        assert_eq!(outcome.show.id, show_id(FEED));
        assert_eq!(outcome.episodes.len(), 1);
        assert_eq!(outcome.episodes[0].guid, "e1");
        assert_eq!(outcome.episodes[0].audio_url, "http://x/a.mp3");
        assert_eq!(outcome.episodes[0].audio_length, Some(100));
        assert_eq!(outcome.new_episodes, 1);
        assert_eq!(outcome.skipped, 1);

        let stored = engine.database().get_episodes_by_show(&show_id(FEED)).await.unwrap();
        assert_eq!(stored, outcome.episodes);
    }

    #[tokio::test]
    async fn test_surrounding_whitespace_maps_to_one_show() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["1"]));

        let padded = format!("  {FEED}\n");
        let outcome = engine.subscribe(&padded).await.unwrap();
        assert_eq!(outcome.show.feed_url, FEED);
        assert_eq!(outcome.show.id, show_id(FEED));

        engine.refresh(FEED).await.unwrap();
        assert_eq!(engine.database().get_all_shows().await.unwrap().len(), 1);

        assert_eq!(engine.unsubscribe(&padded).await.unwrap(), Some(1));
        assert!(engine.database().get_all_shows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["1", "2", "3"]));

        engine.refresh(FEED).await.unwrap();
        let once = snapshot(engine.database()).await;

        let second = engine.refresh(FEED).await.unwrap();
        let twice = snapshot(engine.database()).await;

        assert_eq!(second.new_episodes, 0);
        assert_eq!(once, twice);
        assert_eq!(twice.1.len(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_existing_feed_converges_to_refresh() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["1"]));
        engine.subscribe(FEED).await.unwrap();

        engine.source().serve(FEED, rss("Pod renamed", &["1", "2"]));
        let outcome = engine.subscribe(FEED).await.unwrap();
        assert_eq!(outcome.new_episodes, 1);

        let shows = engine.database().get_all_shows().await.unwrap();
        assert_eq!(shows.len(), 1);
        assert_eq!(shows[0].title, "Pod renamed");

        // A failing re-subscribe reports the refresh it degenerated into
        engine.source().remove(FEED);
        let err = engine.subscribe(FEED).await.unwrap_err();
        assert_eq!(err.action(), SyncAction::Refresh);
        assert!(err.to_string().starts_with("could not refresh: fetch failed"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_episodes_removed_upstream() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["old", "kept"]));
        engine.subscribe(FEED).await.unwrap();

        engine.source().serve(FEED, rss("Pod", &["kept", "new"]));
        engine.refresh(FEED).await.unwrap();

        let mut guids: Vec<String> = engine
            .database()
            .get_episodes_by_show(&show_id(FEED))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.guid)
            .collect();
        guids.sort();
        assert_eq!(guids, vec!["kept", "new", "old"]);
    }

    #[tokio::test]
    async fn test_empty_title_falls_back_to_feed_url() {
        let engine = engine().await;
        engine.source().serve(
            FEED,
            r#"<rss><channel><item><guid>1</guid><enclosure url="http://x/1.mp3"/></item></channel></rss>"#,
        );
        let outcome = engine.subscribe(FEED).await.unwrap();
        assert_eq!(outcome.show.title, FEED);
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_store_untouched() {
        let engine = engine().await;
        engine.source().serve(FEED, "<rss><channel><title>broken");

        let err = engine.subscribe(FEED).await.unwrap_err();
        assert!(matches!(err, SyncError::Parse { action: SyncAction::Subscribe, .. }));
        assert!(err
            .to_string()
            .starts_with("could not subscribe: feed parse failed"));
        assert!(engine.database().get_all_shows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_root_is_parse_error() {
        let engine = engine().await;
        engine.source().serve(FEED, "<html><body>not a feed</body></html>");

        let err = engine.refresh(FEED).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Parse {
                source: ParseError::NoRecognizedRoot,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_state() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["1", "2"]));
        engine.subscribe(FEED).await.unwrap();
        let before = snapshot(engine.database()).await;

        engine.source().serve(FEED, "garbage");
        assert!(engine.refresh(FEED).await.is_err());

        assert_eq!(snapshot(engine.database()).await, before);
    }

    #[tokio::test]
    async fn test_fetch_timeout_aborts_before_store() {
        let source = StaticSource::with_delay(Duration::from_secs(5));
        source.serve(FEED, rss("Pod", &["1"]));
        let options = SyncOptions {
            fetch_timeout: Duration::from_millis(50),
            ..SyncOptions::default()
        };
        let engine = engine_with(source, options).await;

        let err = engine.subscribe(FEED).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Fetch {
                source: FetchError::Timeout,
                ..
            }
        ));
        assert!(!engine.database().exists_by_feed_url(FEED).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_is_not_retried() {
        let engine = engine().await;
        assert!(engine.subscribe(FEED).await.is_err());
        assert_eq!(engine.source().fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_are_serialized() {
        let source = StaticSource::with_delay(Duration::from_millis(30));
        source.serve(FEED, rss("Pod", &["1", "2"]));
        let engine = engine_with(source, SyncOptions::default()).await;

        let (a, b) = tokio::join!(engine.subscribe(FEED), engine.subscribe(FEED));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(engine.source().max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(a.new_episodes + b.new_episodes, 2);
        assert_eq!(engine.database().get_all_shows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_different_feeds_sync_concurrently() {
        let source = StaticSource::with_delay(Duration::from_millis(50));
        source.serve("https://a.example/feed", rss("A", &["1"]));
        source.serve("https://b.example/feed", rss("B", &["1"]));
        let engine = engine_with(source, SyncOptions::default()).await;

        let (a, b) = tokio::join!(
            engine.subscribe("https://a.example/feed"),
            engine.subscribe("https://b.example/feed")
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(engine.source().max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_cascades() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["1", "2", "3"]));
        engine.subscribe(FEED).await.unwrap();

        assert_eq!(engine.unsubscribe(FEED).await.unwrap(), Some(3));
        assert!(!engine.database().exists_by_feed_url(FEED).await.unwrap());
        assert!(engine
            .database()
            .get_episodes_by_show(&show_id(FEED))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(engine.unsubscribe(FEED).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_all_isolates_failures() {
        let engine = engine().await;
        let feeds = [
            "https://a.example/feed",
            "https://b.example/feed",
            "https://c.example/feed",
        ];
        for (i, url) in feeds.iter().enumerate() {
            engine.source().serve(url, rss(&format!("Show {i}"), &["1"]));
            engine.subscribe(url).await.unwrap();
        }

        engine.source().remove("https://b.example/feed");
        engine.source().serve("https://c.example/feed", rss("Show 2", &["1", "2"]));

        let results = engine.refresh_all().await.unwrap();
        assert_eq!(results.len(), 3);

        let by_url: HashMap<&str, &RefreshResult> =
            results.iter().map(|r| (r.feed_url.as_str(), r)).collect();
        assert!(by_url["https://a.example/feed"].result.is_ok());
        assert!(matches!(
            by_url["https://b.example/feed"].result,
            Err(SyncError::Fetch {
                source: FetchError::NonSuccessStatus(404),
                ..
            })
        ));
        let c = by_url["https://c.example/feed"].result.as_ref().unwrap();
        assert_eq!(c.new_episodes, 1);
    }

    #[tokio::test]
    async fn test_refresh_all_empty_catalog() {
        let engine = engine().await;
        assert!(engine.refresh_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_feed_url_rejected_before_fetch() {
        let engine = engine().await;
        for url in ["", "not a url", "ftp://example.com/feed"] {
            assert!(matches!(
                engine.subscribe(url).await,
                Err(SyncError::InvalidFeedUrl { .. })
            ));
        }
        assert_eq!(engine.source().fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_error_is_reported_with_stage() {
        let engine = engine().await;
        engine.source().serve(FEED, rss("Pod", &["1"]));
        engine.database().close().await;

        let err = engine.subscribe(FEED).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Store {
                source: StoreError::Other(_) | StoreError::TransactionFailed(_),
                ..
            }
        ));
        assert!(err.to_string().contains("storage failed"));
    }
}
