use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Flattened view of an XML document: the root element's local name and the
/// first non-empty text found at each element path below it.
///
/// Paths are built from local names only, so namespace prefixes never matter:
/// `<ns:bill><ns:number>1</ns:number></ns:bill>` answers to `bill/number`.
#[derive(Debug, Default)]
pub(crate) struct XmlDoc {
    root: String,
    fields: HashMap<String, String>,
}

impl XmlDoc {
    pub(crate) fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    #[cfg(test)]
    pub(crate) fn parse_str(xml: &str) -> Result<Self> {
        Self::from_reader(xml.as_bytes())
    }

    fn from_reader<R: BufRead>(input: R) -> Result<Self> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);

        let mut doc = XmlDoc::default();
        // (path below root, text collected so far) per open element
        let mut stack: Vec<(String, String)> = Vec::new();
        let mut buf = Vec::with_capacity(4096);

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    let path = match stack.last() {
                        None => {
                            doc.root = name;
                            String::new()
                        }
                        Some((parent, _)) if parent.is_empty() => name,
                        Some((parent, _)) => format!("{parent}/{name}"),
                    };
                    stack.push((path, String::new()));
                }
                Event::Empty(ref e) if stack.is_empty() => {
                    doc.root = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                }
                Event::Text(ref e) => {
                    if let Some((_, text)) = stack.last_mut() {
                        match e.unescape() {
                            Ok(t) => text.push_str(&t),
                            Err(_) => text.push_str(&String::from_utf8_lossy(e)),
                        }
                    }
                }
                Event::CData(e) => {
                    if let Some((_, text)) = stack.last_mut() {
                        text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::End(_) => {
                    if let Some((path, text)) = stack.pop() {
                        let text = text.trim();
                        if !path.is_empty() && !text.is_empty() {
                            doc.fields.entry(path).or_insert_with(|| text.to_string());
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if doc.root.is_empty() {
            anyhow::bail!("no root element");
        }
        Ok(doc)
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    /// Text at `path` (relative to the root element), if present and non-empty.
    pub(crate) fn text(&self, path: &str) -> Option<&str> {
        self.fields.get(path).map(String::as_str)
    }

    /// First of `paths` that has text. Used where element names changed
    /// between format generations.
    pub(crate) fn first_of(&self, paths: &[&str]) -> Option<&str> {
        paths.iter().find_map(|p| self.text(p))
    }
}

/// Text of every element whose local name is `name`, in document order.
/// Malformed input yields whatever was read before the error.
pub(crate) fn texts_named(xml: &str, name: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Vec::new();
    let mut inside = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => inside = e.local_name().as_ref() == name.as_bytes(),
            Ok(Event::Text(e)) if inside => {
                if let Ok(text) = e.unescape() {
                    out.push(text.into_owned());
                }
                inside = false;
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    out
}

/// Local name of the document's root element, reading no further than it.
pub(crate) fn root_element(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_ignore_namespace_prefixes() {
        let doc = XmlDoc::parse_str(
            r#"<?xml version="1.0"?>
            <b:billStatus xmlns:b="urn:x"><b:bill><b:number>12</b:number></b:bill></b:billStatus>"#,
        )
        .unwrap();
        assert_eq!(doc.root(), "billStatus");
        assert_eq!(doc.text("bill/number"), Some("12"));
    }

    #[test]
    fn first_occurrence_wins() {
        let doc = XmlDoc::parse_str(
            "<r><items><item><name>first</name></item><item><name>second</name></item></items></r>",
        )
        .unwrap();
        assert_eq!(doc.text("items/item/name"), Some("first"));
    }

    #[test]
    fn entities_and_cdata_are_text() {
        let doc = XmlDoc::parse_str("<r><t>A &amp; B</t><c><![CDATA[x < y]]></c></r>").unwrap();
        assert_eq!(doc.text("t"), Some("A & B"));
        assert_eq!(doc.text("c"), Some("x < y"));
    }

    #[test]
    fn blank_elements_are_absent() {
        let doc = XmlDoc::parse_str("<r><a>  </a><b/></r>").unwrap();
        assert_eq!(doc.text("a"), None);
        assert_eq!(doc.first_of(&["a", "b", "c"]), None);
    }

    #[test]
    fn mismatched_tags_are_an_error() {
        assert!(XmlDoc::parse_str("<r><a></b></r>").is_err());
    }

    #[test]
    fn texts_named_collects_every_occurrence() {
        let xml = "<vote_summary><votes>\
            <vote><vote_number>00001</vote_number><title>a</title></vote>\
            <vote><vote_number>00002</vote_number></vote>\
            </votes></vote_summary>";
        assert_eq!(texts_named(xml, "vote_number"), vec!["00001", "00002"]);
        assert!(texts_named(xml, "missing").is_empty());
    }
}
