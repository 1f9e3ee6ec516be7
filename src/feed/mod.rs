//! Feed retrieval and parsing.
//!
//! - [`parser`] - dialect detection and canonical [`Feed`] construction
//! - `rss` / `atom` - per-dialect fallback chains and item extraction
//! - `extract` - the declarative field extractors both dialects share
//! - `normalize` - description, duration and date normalization
//! - [`fetcher`] - the [`FeedSource`] seam and its HTTP implementation
//!
//! # Example
//!
//! ```ignore
//! use podsync::feed::{parse, FeedSource, HttpFeedSource};
//!
//! let bytes = source.fetch("https://example.com/feed.xml").await?;
//! let feed = parse(&bytes)?;
//! println!("{} ({} episodes)", feed.title, feed.items.len());
//! ```

mod atom;
mod extract;
mod fetcher;
mod normalize;
mod parser;
mod rss;
mod xml;

use thiserror::Error;

pub use fetcher::{FeedSource, FetchError, HttpFeedSource, DEFAULT_MAX_FEED_SIZE};
pub use normalize::{normalize_date, normalize_duration, sanitize_description};
pub use parser::parse;

/// Document-level parse failures. Per-item problems never surface here.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Empty input or input that is not well-formed XML
    #[error("malformed feed document: {0}")]
    Malformed(String),
    /// Well-formed XML with neither an Atom `feed` nor an RSS `channel`
    #[error("no recognized feed root (expected Atom <feed> or RSS <channel>)")]
    NoRecognizedRoot,
}

/// The two supported feed formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rss,
    Atom,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Rss => f.write_str("rss"),
            Dialect::Atom => f.write_str("atom"),
        }
    }
}

/// Canonical feed document, identical in shape for both dialects.
#[derive(Debug, Clone)]
pub struct Feed {
    pub dialect: Dialect,
    /// May be empty; callers substitute the feed URL
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub copyright: Option<String>,
    /// `lastBuildDate` (RSS) or `updated` (Atom), unix seconds
    pub updated_at: Option<i64>,
    /// Valid items only, unique by guid, in document order
    pub items: Vec<FeedItem>,
    /// Number of items dropped by the validity gate or as duplicates
    pub skipped: usize,
}

/// Audio attachment of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
    pub length: Option<i64>,
}

/// One playable item from a feed.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub guid: String,
    pub title: String,
    /// Sanitized plain text
    pub description: String,
    pub published_at: Option<i64>,
    /// Normalized display duration (`M:SS`, `H:MM:SS`) or empty
    pub duration: String,
    pub image_url: Option<String>,
    pub enclosure: Enclosure,
    pub link: Option<String>,
    pub author: Option<String>,
}

/// Why an item was dropped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRejection {
    MissingIdentifier,
    MissingAudioUrl,
}

impl std::fmt::Display for ItemRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemRejection::MissingIdentifier => f.write_str("missing guid/id/link"),
            ItemRejection::MissingAudioUrl => f.write_str("missing audio URL"),
        }
    }
}
