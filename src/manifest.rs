//! DASH manifest (MPD) model.
//!
//! Only the parts the relay touches are typed: the MPD-level `BaseURL`, the
//! periods, and each period's adaptation sets. Everything else is kept as a
//! generic XML tree and written back unchanged.
//!
//! Adaptation sets live in `Option` slots. A removed set leaves `None` in
//! place, so the remaining sets keep their index; empty slots are skipped
//! when serializing.
use std::io::Write;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};

/// Generic XML node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

/// Generic XML element with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Qualified name, prefix included.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text content of direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) | Node::CData(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>()
            .trim()
            .to_string()
    }
}

/// One `AdaptationSet` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationSet {
    pub element: Element,
}

impl AdaptationSet {
    /// The `contentType` attribute, e.g. `video`, `audio` or `text`.
    pub fn content_type(&self) -> Option<&str> {
        self.element.attribute("contentType")
    }
}

/// One `Period` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Children preceding the first adaptation set.
    pub leading: Vec<Node>,
    pub adaptation_sets: Vec<Option<AdaptationSet>>,
    /// Children following the first adaptation set, other than adaptation sets.
    pub trailing: Vec<Node>,
}

impl Period {
    fn from_element(element: Element) -> Self {
        let mut leading = Vec::new();
        let mut adaptation_sets = Vec::new();
        let mut trailing = Vec::new();

        for child in element.children {
            match child {
                Node::Element(el) if el.local_name() == "AdaptationSet" => {
                    adaptation_sets.push(Some(AdaptationSet { element: el }));
                }
                other if adaptation_sets.is_empty() => leading.push(other),
                other => trailing.push(other),
            }
        }

        Self {
            name: element.name,
            attributes: element.attributes,
            leading,
            adaptation_sets,
            trailing,
        }
    }

    /// Content types of each slot, `None` for empty slots.
    pub fn content_types(&self) -> Vec<Option<&str>> {
        self.adaptation_sets
            .iter()
            .map(|slot| slot.as_ref().and_then(AdaptationSet::content_type))
            .collect()
    }
}

/// Parsed MPD document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Text of the first MPD-level `BaseURL`. Further `BaseURL` elements stay
    /// in `leading` untouched.
    pub base_url: Option<String>,
    /// Attributes of the first `BaseURL`, e.g. `serviceLocation`.
    pub base_url_attributes: Vec<(String, String)>,
    /// Children preceding the first period, the typed `BaseURL` excluded.
    pub leading: Vec<Node>,
    pub periods: Vec<Period>,
    pub trailing: Vec<Node>,
}

impl Manifest {
    /// Parse an MPD document.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = parse_document(data)?;
        Self::from_element(root)
    }

    fn from_element(root: Element) -> Result<Self> {
        if root.local_name() != "MPD" {
            return Err(Error::ManifestParse(format!(
                "root element is <{}>, expected <MPD>",
                root.name
            )));
        }

        let mut base_url = None;
        let mut base_url_attributes = Vec::new();
        let mut leading = Vec::new();
        let mut periods = Vec::new();
        let mut trailing = Vec::new();

        for child in root.children {
            match child {
                Node::Element(el) if el.local_name() == "BaseURL" && base_url.is_none() => {
                    base_url = Some(el.text());
                    base_url_attributes = el.attributes;
                }
                Node::Element(el) if el.local_name() == "Period" => {
                    periods.push(Period::from_element(el));
                }
                other if periods.is_empty() => leading.push(other),
                other => trailing.push(other),
            }
        }

        Ok(Self {
            name: root.name,
            attributes: root.attributes,
            base_url,
            base_url_attributes,
            leading,
            periods,
            trailing,
        })
    }

    /// Serialize to an indented UTF-8 document. Empty slots are omitted.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }

    fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        emit(writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        emit(writer, Event::Start(start_tag(&self.name, &self.attributes)))?;

        // BaseURL follows ProgramInformation and precedes everything else.
        let split = self
            .leading
            .iter()
            .rposition(|node| {
                matches!(node, Node::Element(el) if el.local_name() == "ProgramInformation")
            })
            .map_or(0, |i| i + 1);
        let (before, after) = self.leading.split_at(split);

        write_nodes(writer, before)?;
        if let Some(base_url) = &self.base_url {
            let name = prefixed(&self.name, "BaseURL");
            emit(writer, Event::Start(start_tag(&name, &self.base_url_attributes)))?;
            emit(writer, Event::Text(BytesText::new(base_url)))?;
            emit(writer, Event::End(BytesEnd::new(name.as_str())))?;
        }
        write_nodes(writer, after)?;

        for period in &self.periods {
            let start = start_tag(&period.name, &period.attributes);
            let has_children = !period.leading.is_empty()
                || !period.trailing.is_empty()
                || period.adaptation_sets.iter().any(Option::is_some);
            if !has_children {
                emit(writer, Event::Empty(start))?;
                continue;
            }

            emit(writer, Event::Start(start))?;
            write_nodes(writer, &period.leading)?;
            for set in period.adaptation_sets.iter().flatten() {
                write_element(writer, &set.element)?;
            }
            write_nodes(writer, &period.trailing)?;
            emit(writer, Event::End(BytesEnd::new(period.name.as_str())))?;
        }

        write_nodes(writer, &self.trailing)?;
        emit(writer, Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// `local` with the namespace prefix of `sibling`, if any.
fn prefixed(sibling: &str, local: &str) -> String {
    match sibling.rsplit_once(':') {
        Some((prefix, _)) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

fn parse_error(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> Error {
    Error::ManifestParse(format!("at byte {}: {}", reader.buffer_position(), err))
}

fn parse_document(data: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| parse_error(&reader, e))?
        {
            Event::Start(ref e) => {
                let element = element_from_tag(e).map_err(|e| parse_error(&reader, e))?;
                stack.push(element);
            }
            Event::Empty(ref e) => {
                let element = element_from_tag(e).map_err(|e| parse_error(&reader, e))?;
                attach(&mut stack, &mut root, element).map_err(|e| parse_error(&reader, e))?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| parse_error(&reader, "unexpected closing tag"))?;
                attach(&mut stack, &mut root, element).map_err(|e| parse_error(&reader, e))?;
            }
            Event::Text(ref e) => {
                let text = e.unescape().map_err(|e| parse_error(&reader, e))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.into_owned()));
                }
            }
            Event::CData(e) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    parent.children.push(Node::CData(text));
                }
            }
            Event::Comment(e) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    parent.children.push(Node::Comment(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(Error::ManifestParse(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| Error::ManifestParse("document has no root element".to_string()))
}

fn element_from_tag(tag: &BytesStart<'_>) -> std::result::Result<Element, String> {
    let mut element = Element::new(String::from_utf8_lossy(tag.name().as_ref()));
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> std::result::Result<(), &'static str> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err("multiple root elements"),
    }
    Ok(())
}

fn start_tag<'a>(name: &'a str, attributes: &'a [(String, String)]) -> BytesStart<'a> {
    BytesStart::new(name).with_attributes(
        attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str())),
    )
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::Other(format!("Failed to write manifest: {}", e)))
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &Element) -> Result<()> {
    let start = start_tag(&element.name, &element.attributes);
    if element.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    emit(writer, Event::Start(start))?;
    write_nodes(writer, &element.children)?;
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

fn write_nodes<W: Write>(writer: &mut Writer<W>, nodes: &[Node]) -> Result<()> {
    for node in nodes {
        match node {
            Node::Element(element) => write_element(writer, element)?,
            Node::Text(text) => emit(writer, Event::Text(BytesText::new(text)))?,
            Node::CData(text) => emit(writer, Event::CData(BytesCData::new(text.as_str())))?,
            Node::Comment(text) => {
                emit(writer, Event::Comment(BytesText::from_escaped(text.as_str())))?
            }
        }
    }
    Ok(())
}
