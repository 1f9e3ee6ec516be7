use std::collections::HashSet;

use super::extract::{first_match, Extractor};
use super::normalize::{normalize_date, normalize_duration, sanitize_description};
use super::xml::{parse_document, Element};
use super::{atom, rss, Dialect, Enclosure, Feed, FeedItem, ItemRejection, ParseError};

/// Show-level fallback chains for one dialect.
pub(crate) struct ShowChains {
    pub title: &'static [Extractor],
    pub description: &'static [Extractor],
    pub author: &'static [Extractor],
    pub image: &'static [Extractor],
    pub link: &'static [Extractor],
    pub language: &'static [Extractor],
    pub copyright: &'static [Extractor],
    pub updated: &'static [Extractor],
}

/// Item-level fallback chains for one dialect.
pub(crate) struct ItemChains {
    pub id: &'static [Extractor],
    pub audio_url: &'static [Extractor],
    pub audio_type: &'static [Extractor],
    pub audio_length: &'static [Extractor],
    pub title: &'static [Extractor],
    pub description: &'static [Extractor],
    pub published: &'static [Extractor],
    pub duration: &'static [Extractor],
    pub image: &'static [Extractor],
    pub author: &'static [Extractor],
    pub link: &'static [Extractor],
}

/// Parses raw feed bytes into the canonical [`Feed`].
///
/// A root `feed` element selects Atom; otherwise an RSS `channel` is
/// required. Items are extracted one at a time: an item without an
/// identifier or an audio URL is logged and dropped, and never affects the
/// remaining items or the show-level fields.
///
/// # Errors
///
/// - [`ParseError::Malformed`] for empty or non-well-formed input
/// - [`ParseError::NoRecognizedRoot`] when neither root is present
pub fn parse(raw: &[u8]) -> Result<Feed, ParseError> {
    let root = parse_document(raw)?;

    let (dialect, show_chains, item_chains, (channel, entries)) =
        if let Some(located) = atom::locate(&root) {
            (Dialect::Atom, &atom::SHOW, &atom::ITEM, located)
        } else if let Some(located) = rss::locate(&root) {
            (Dialect::Rss, &rss::SHOW, &rss::ITEM, located)
        } else {
            return Err(ParseError::NoRecognizedRoot);
        };

    let mut items = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    let mut skipped = 0;

    for (position, entry) in entries.into_iter().enumerate() {
        match extract_item(entry, item_chains) {
            Ok(item) => {
                if seen.insert(item.guid.clone()) {
                    items.push(item);
                } else {
                    skipped += 1;
                    tracing::warn!(
                        dialect = %dialect,
                        position = position,
                        guid = %item.guid,
                        "Dropping feed item with duplicate guid"
                    );
                }
            }
            Err(reason) => {
                skipped += 1;
                tracing::warn!(
                    dialect = %dialect,
                    position = position,
                    reason = %reason,
                    "Dropping invalid feed item"
                );
            }
        }
    }

    Ok(Feed {
        dialect,
        title: first_match(show_chains.title, channel).unwrap_or_default(),
        description: first_match(show_chains.description, channel)
            .map(|d| sanitize_description(&d))
            .filter(|d| !d.is_empty()),
        link: first_match(show_chains.link, channel),
        image_url: first_match(show_chains.image, channel),
        author: first_match(show_chains.author, channel),
        language: first_match(show_chains.language, channel),
        copyright: first_match(show_chains.copyright, channel),
        updated_at: first_match(show_chains.updated, channel).and_then(|d| normalize_date(&d)),
        items,
        skipped,
    })
}

fn extract_item(entry: &Element, chains: &ItemChains) -> Result<FeedItem, ItemRejection> {
    let guid = first_match(chains.id, entry).ok_or(ItemRejection::MissingIdentifier)?;
    let audio_url = first_match(chains.audio_url, entry).ok_or(ItemRejection::MissingAudioUrl)?;

    let enclosure = Enclosure {
        url: audio_url,
        mime_type: first_match(chains.audio_type, entry),
        length: first_match(chains.audio_length, entry).and_then(|l| l.parse().ok()),
    };

    Ok(FeedItem {
        guid,
        title: first_match(chains.title, entry).unwrap_or_default(),
        description: first_match(chains.description, entry)
            .map(|d| sanitize_description(&d))
            .unwrap_or_default(),
        published_at: first_match(chains.published, entry).and_then(|d| normalize_date(&d)),
        duration: first_match(chains.duration, entry)
            .map(|d| normalize_duration(&d))
            .unwrap_or_default(),
        image_url: first_match(chains.image, entry),
        enclosure,
        link: first_match(chains.link, entry),
        author: first_match(chains.author, entry),
    })
}
