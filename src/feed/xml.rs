//! Minimal element tree built from `quick-xml` events.
//!
//! Feeds are small enough to hold in memory, and the field extractors need
//! random access (child lookups, attribute reads, nested paths), so the event
//! stream is folded into a tree once. Building the tree is also where
//! well-formedness is enforced: mismatched or unclosed tags, malformed or
//! duplicate attributes, undefined entity references, stray text outside the
//! root and multiple roots are all rejected here. Text and CDATA keep their
//! position among child elements and their whitespace.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::ParseError;

/// SEC-003: Maximum element nesting depth accepted from a feed document.
const MAX_DEPTH: usize = 64;

/// A child of an element: either a nested element or a run of text.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Element(Element),
    /// Unescaped text or CDATA, whitespace preserved
    Text(String),
}

/// An XML element with its attributes and children in document order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Element {
    /// Qualified name as written in the document (`itunes:image`, `link`, ...)
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();

        // Attribute checks reject duplicate, unquoted and valueless attributes
        for attr_result in start.attributes() {
            let attr = attr_result.map_err(|e| {
                ParseError::Malformed(format!("malformed attribute in <{name}>: {e}"))
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| {
                    ParseError::Malformed(format!("bad attribute value {key} in <{name}>: {e}"))
                })?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    /// Name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// First direct child with the given qualified name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |c| c.name == name)
    }

    /// Text of this element and all descendants, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) => el.collect_text(out),
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        // Adjacent text and CDATA runs merge into one node
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_owned()));
        }
    }
}

/// Parses a complete document into its root element.
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] for empty input, invalid UTF-8, syntax
/// errors, mismatched or unclosed tags, malformed or duplicate attributes,
/// undefined entity references, more than one root element, text outside the
/// root, or nesting deeper than [`MAX_DEPTH`].
pub(crate) fn parse_document(raw: &[u8]) -> Result<Element, ParseError> {
    let content = std::str::from_utf8(raw)
        .map_err(|e| ParseError::Malformed(format!("invalid UTF-8: {e}")))?;
    let content = content.trim_start_matches('\u{feff}');

    if content.trim().is_empty() {
        return Err(ParseError::Malformed("empty document".to_string()));
    }

    // SEC-002: quick-xml never expands <!ENTITY> declarations; references to
    // them are undefined entities and reject the document.
    let mut reader = Reader::from_str(content);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(ParseError::Malformed("multiple root elements".to_string()));
                }
                // SEC-003: bound nesting depth
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::Malformed(format!(
                        "nesting depth exceeds {MAX_DEPTH} levels"
                    )));
                }
                stack.push(Element::from_start(&e, &reader)?);
            }
            Ok(Event::Empty(e)) => {
                let element = Element::from_start(&e, &reader)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None if root.is_none() => root = Some(element),
                    None => {
                        return Err(ParseError::Malformed("multiple root elements".to_string()))
                    }
                }
            }
            Ok(Event::End(_)) => {
                // quick-xml already rejects mismatched end names
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::Malformed("unexpected closing tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| ParseError::Malformed(format!("bad character data: {err}")))?;
                match stack.last_mut() {
                    Some(current) => current.push_text(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(ParseError::Malformed(
                            "text outside of the root element".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::CData(e)) => {
                let text = std::str::from_utf8(&e)
                    .map_err(|err| ParseError::Malformed(format!("invalid UTF-8 in CDATA: {err}")))?;
                match stack.last_mut() {
                    Some(current) => current.push_text(text),
                    None => {
                        return Err(ParseError::Malformed(
                            "CDATA outside of the root element".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Malformed(e.to_string())),
            // Declarations, comments, processing instructions and DOCTYPE carry no feed data
            Ok(_) => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Malformed(format!(
            "unclosed element <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| ParseError::Malformed("no root element".to_string()))
}
