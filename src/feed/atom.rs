//! Atom fallback chains. Podcast Atom feeds put audio in Media RSS
//! (`media:content`) or in `link rel="enclosure"`.

use super::extract::Extractor::{AlternateLink, Attr, LinkRel, OwnAttr, Path, PathAttr, Text};
use super::parser::{ItemChains, ShowChains};
use super::xml::Element;

pub(crate) const SHOW: ShowChains = ShowChains {
    title: &[Text("title")],
    description: &[Text("subtitle"), Text("itunes:summary")],
    author: &[Path(&["author", "name"]), Text("itunes:author")],
    image: &[Attr("itunes:image", "href"), Text("logo"), Text("icon")],
    link: &[AlternateLink],
    language: &[OwnAttr("xml:lang")],
    copyright: &[Text("rights")],
    updated: &[Text("updated")],
};

pub(crate) const ITEM: ItemChains = ItemChains {
    id: &[Text("id"), Text("guid"), AlternateLink],
    audio_url: &[
        PathAttr(&["media:group", "media:content"], "url"),
        Attr("media:content", "url"),
        LinkRel("enclosure", "href"),
    ],
    audio_type: &[
        PathAttr(&["media:group", "media:content"], "type"),
        Attr("media:content", "type"),
        LinkRel("enclosure", "type"),
    ],
    audio_length: &[
        PathAttr(&["media:group", "media:content"], "fileSize"),
        Attr("media:content", "fileSize"),
        LinkRel("enclosure", "length"),
    ],
    title: &[Text("title")],
    description: &[Text("content"), Text("summary")],
    published: &[Text("published"), Text("updated")],
    duration: &[Text("itunes:duration")],
    image: &[
        PathAttr(&["media:group", "media:thumbnail"], "url"),
        Attr("media:thumbnail", "url"),
        Attr("itunes:image", "href"),
    ],
    author: &[Path(&["author", "name"]), Text("itunes:author")],
    link: &[AlternateLink],
};

/// The `feed` root and its entries.
pub(crate) fn locate(root: &Element) -> Option<(&Element, Vec<&Element>)> {
    if root.local_name() != "feed" {
        return None;
    }
    let entries = root
        .elements()
        .filter(|c| c.local_name() == "entry")
        .collect();
    Some((root, entries))
}
