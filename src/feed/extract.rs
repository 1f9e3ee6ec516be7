//! Declarative field extractors.
//!
//! Each canonical field is described by an ordered slice of [`Extractor`]s.
//! [`first_match`] walks the slice and returns the first non-empty value, so
//! the fallback order for every field lives in one constant per dialect.

use super::xml::Element;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Extractor {
    /// Text content of a direct child
    Text(&'static str),
    /// Attribute of a direct child
    Attr(&'static str, &'static str),
    /// Text content at a nested child path
    Path(&'static [&'static str]),
    /// Attribute of the element at a nested child path
    PathAttr(&'static [&'static str], &'static str),
    /// Attribute of the element itself
    OwnAttr(&'static str),
    /// Attribute of the first `link` child whose `rel` matches
    LinkRel(&'static str, &'static str),
    /// Atom alternate link: `rel` absent or `alternate`, else the first link
    AlternateLink,
}

impl Extractor {
    pub fn extract(&self, element: &Element) -> Option<String> {
        let value = match *self {
            Extractor::Text(name) => element.child(name).map(Element::text_content),
            Extractor::Attr(name, attr) => element
                .child(name)
                .and_then(|c| c.attr(attr))
                .map(str::to_owned),
            Extractor::Path(path) => descend(element, path).map(Element::text_content),
            Extractor::PathAttr(path, attr) => descend(element, path)
                .and_then(|c| c.attr(attr))
                .map(str::to_owned),
            Extractor::OwnAttr(attr) => element.attr(attr).map(str::to_owned),
            Extractor::LinkRel(rel, attr) => element
                .children_named("link")
                .find(|l| l.attr("rel") == Some(rel))
                .and_then(|l| l.attr(attr))
                .map(str::to_owned),
            Extractor::AlternateLink => {
                let mut links = element.children_named("link");
                let preferred = element
                    .children_named("link")
                    .find(|l| matches!(l.attr("rel"), None | Some("alternate")));
                preferred
                    .or_else(|| links.next())
                    .and_then(|l| l.attr("href"))
                    .map(str::to_owned)
            }
        }?;

        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}

fn descend<'a>(element: &'a Element, path: &[&str]) -> Option<&'a Element> {
    path.iter().try_fold(element, |current, name| current.child(name))
}

/// Applies a fallback chain, first non-empty value wins.
pub(crate) fn first_match(chain: &[Extractor], element: &Element) -> Option<String> {
    chain.iter().find_map(|extractor| extractor.extract(element))
}
