//! Podcast search against an iTunes-compatible directory.
//!
//! The directory only supplies candidate feed URLs; subscribing goes through
//! [`SyncEngine::subscribe`](crate::sync::SyncEngine::subscribe).

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Public iTunes Search API
pub const DEFAULT_DIRECTORY_URL: &str = "https://itunes.apple.com";

/// Default number of results per search
pub const DEFAULT_SEARCH_LIMIT: u32 = 8;

/// How long a search response is reused (15 minutes)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// The API caps results at 200
const MAX_SEARCH_LIMIT: u32 = 200;

const CACHE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Search query is empty")]
    EmptyQuery,
    #[error("Invalid directory URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("Directory request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Directory returned HTTP status {0}")]
    HttpStatus(u16),
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub feed_url: String,
    pub title: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    feed_url: Option<String>,
    collection_name: Option<String>,
    track_name: Option<String>,
    artist_name: Option<String>,
    artwork_url600: Option<String>,
    artwork_url100: Option<String>,
}

impl SearchResult {
    fn into_entry(self) -> Option<DirectoryEntry> {
        let feed_url = non_empty(self.feed_url)?;
        let title = non_empty(self.collection_name)
            .or_else(|| non_empty(self.track_name))
            .unwrap_or_else(|| feed_url.clone());
        Some(DirectoryEntry {
            feed_url,
            title,
            author: non_empty(self.artist_name),
            image_url: non_empty(self.artwork_url600).or_else(|| non_empty(self.artwork_url100)),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

struct CacheEntry {
    stored_at: Instant,
    entries: Vec<DirectoryEntry>,
}

/// Search client with a small time-bounded response cache.
pub struct DirectoryClient {
    client: reqwest::Client,
    base_url: Url,
    ttl: Duration,
    cache: Mutex<LruCache<String, CacheEntry>>,
}

impl DirectoryClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, DirectoryError> {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Search podcasts matching `query`.
    ///
    /// Results without a feed URL are dropped. Identical requests within the
    /// cache TTL are answered from memory.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DirectoryError::EmptyQuery);
        }

        let mut url = self.base_url.join("/search")?;
        url.query_pairs_mut()
            .append_pair("term", query)
            .append_pair("media", "podcast")
            .append_pair("limit", &limit.clamp(1, MAX_SEARCH_LIMIT).to_string());
        let key = url.to_string();

        if let Some(hit) = self.cached(&key) {
            tracing::debug!(query = %query, results = hit.len(), "Directory cache hit");
            return Ok(hit);
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DirectoryError::HttpStatus(response.status().as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        let entries: Vec<DirectoryEntry> = body
            .results
            .into_iter()
            .filter_map(SearchResult::into_entry)
            .collect();

        tracing::debug!(query = %query, results = entries.len(), "Directory search");
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(
                key,
                CacheEntry {
                    stored_at: Instant::now(),
                    entries: entries.clone(),
                },
            );
        Ok(entries)
    }

    fn cached(&self, key: &str) -> Option<Vec<DirectoryEntry>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(key) {
            Some(hit) if hit.stored_at.elapsed() < self.ttl => Some(hit.entries.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }
}
