//! RSS 2.0 fallback chains, with the iTunes, Dublin Core and Media RSS
//! extensions podcast feeds commonly carry.

use super::extract::Extractor::{Attr, Path, Text};
use super::parser::{ItemChains, ShowChains};
use super::xml::Element;

pub(crate) const SHOW: ShowChains = ShowChains {
    title: &[Text("title")],
    description: &[
        Text("description"),
        Text("itunes:summary"),
        Text("subtitle"),
        Text("itunes:subtitle"),
    ],
    author: &[Text("itunes:author"), Text("author"), Text("managingEditor")],
    image: &[
        Attr("itunes:image", "href"),
        Path(&["image", "url"]),
        Attr("image", "href"),
    ],
    link: &[Text("link")],
    language: &[Text("language")],
    copyright: &[Text("copyright")],
    updated: &[Text("lastBuildDate"), Text("pubDate")],
};

pub(crate) const ITEM: ItemChains = ItemChains {
    id: &[Text("guid"), Text("id"), Text("link")],
    audio_url: &[Attr("enclosure", "url")],
    audio_type: &[Attr("enclosure", "type")],
    audio_length: &[Attr("enclosure", "length")],
    title: &[Text("title"), Text("itunes:title")],
    description: &[
        Text("description"),
        Text("itunes:summary"),
        Text("content:encoded"),
    ],
    published: &[Text("pubDate"), Text("dc:date")],
    duration: &[Text("itunes:duration")],
    image: &[
        Attr("itunes:image", "href"),
        Attr("media:thumbnail", "url"),
    ],
    author: &[Text("itunes:author"), Text("author"), Text("dc:creator")],
    link: &[Text("link")],
};

/// Finds the `channel` and its items.
///
/// RSS 2.0 nests items inside the channel; RSS 1.0 (RDF) places them next to
/// it under the root, so root-level items are used when the channel has none.
pub(crate) fn locate(root: &Element) -> Option<(&Element, Vec<&Element>)> {
    let channel = if root.local_name() == "channel" {
        root
    } else {
        root.elements().find(|c| c.local_name() == "channel")?
    };

    let mut items: Vec<&Element> = channel
        .elements()
        .filter(|c| c.local_name() == "item")
        .collect();

    if items.is_empty() && !std::ptr::eq(channel, root) {
        items = root
            .elements()
            .filter(|c| c.local_name() == "item")
            .collect();
    }

    Some((channel, items))
}
