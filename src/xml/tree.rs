//! Generic ordered XML element tree.
//!
//! The canonicalizer and signature normalizer operate on this tree rather
//! than on strings. Serialization is deterministic and adds no indentation
//! or whitespace, so serializing an unchanged tree always yields identical
//! bytes: the property the signature digest depends on.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::core::EkuatiaError;

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A nested element.
    Element(Element),
    /// Unescaped character data.
    Text(String),
}

/// An XML element: qualified name, attributes in document order, children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written (e.g. `ds:Signature`).
    pub name: String,
    /// Attributes in document order.
    pub attrs: Vec<(String, String)>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Local name with any namespace prefix stripped.
    pub fn local_name(&self) -> &str {
        match self.name.rsplit_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    /// Append a child element, builder style.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Append an attribute, builder style.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Append a child element holding only text.
    pub fn with_text_child(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut child = Element::new(name);
        child.children.push(Node::Text(text.into()));
        self.children.push(Node::Element(child));
        self
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Iterate direct child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First direct child element with the given local name.
    pub fn find_child(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.local_name() == local)
    }

    /// Whether any direct child element has the given local name.
    pub fn has_child(&self, local: &str) -> bool {
        self.find_child(local).is_some()
    }

    /// Serialize this element (and subtree) to bytes, without an XML
    /// declaration. Deterministic: no indentation, attributes in stored
    /// order, childless elements as `<name/>`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EkuatiaError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_element(&mut writer, self)?;
        Ok(writer.into_inner().into_inner())
    }

    /// Serialize with a leading `<?xml version="1.0" encoding="UTF-8"?>`
    /// declaration, as the wire format requires for document roots.
    pub fn to_document_bytes(&self) -> Result<Vec<u8>, EkuatiaError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_io)?;
        write_element(&mut writer, self)?;
        Ok(writer.into_inner().into_inner())
    }
}

fn xml_io(e: std::io::Error) -> EkuatiaError {
    EkuatiaError::Xml(format!("XML write error: {e}"))
}

fn write_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &Element,
) -> Result<(), EkuatiaError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (k, v) in &element.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_io)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(xml_io)?;
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(xml_io)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_io)?;
    Ok(())
}

/// Parse an XML document into its root element.
pub fn parse(xml: &str) -> Result<Element, EkuatiaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(element_from_start(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from_start(e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| EkuatiaError::Xml(format!("bad character data: {e}")))?
                    .to_string();
                if !text.is_empty() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| EkuatiaError::Xml("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, PIs, CDATA wrappers are not part of
            // the canonical model.
            Ok(_) => {}
            Err(e) => return Err(EkuatiaError::Xml(format!("XML parse error: {e}"))),
        }
    }

    if !stack.is_empty() {
        return Err(EkuatiaError::Xml("unclosed element at end of input".into()));
    }
    root.ok_or_else(|| EkuatiaError::Xml("document has no root element".into()))
}

/// Parse raw bytes, requiring valid UTF-8.
pub fn parse_bytes(xml: &[u8]) -> Result<Element, EkuatiaError> {
    let s = std::str::from_utf8(xml)
        .map_err(|e| EkuatiaError::Xml(format!("document is not UTF-8: {e}")))?;
    parse(s)
}

/// Qualified name of the root element, without parsing the whole document.
///
/// Used by the packager to detect an already-enveloped payload before
/// wrapping.
pub fn root_tag(xml: &[u8]) -> Result<String, EkuatiaError> {
    let s = std::str::from_utf8(xml)
        .map_err(|e| EkuatiaError::Xml(format!("document is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(s);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => {
                return Err(EkuatiaError::Xml("document has no root element".into()));
            }
            Ok(_) => {}
            Err(e) => return Err(EkuatiaError::Xml(format!("XML parse error: {e}"))),
        }
    }
}

fn element_from_start(e: &BytesStart<'_>) -> Result<Element, EkuatiaError> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|_| EkuatiaError::Xml("element name is not UTF-8".into()))?
        .to_string();
    let mut element = Element::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| EkuatiaError::Xml(format!("bad attribute: {e}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| EkuatiaError::Xml("attribute name is not UTF-8".into()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| EkuatiaError::Xml(format!("bad attribute value: {e}")))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), EkuatiaError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(EkuatiaError::Xml(
            "multiple root elements in document".into(),
        )),
    }
}
