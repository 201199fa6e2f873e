//! Generic XML-to-tree normalization
//!
//! NETCONF replies come in many vendor shapes and the schema is not known in
//! advance, so instead of deserializing into fixed structs the reply is
//! normalized into an order-preserving labeled tree:
//! - namespace prefixes are stripped from every tag (`nc:data`, `{urn:x}data` -> `data`)
//! - a leaf element carries its text (empty string when absent, never `None`)
//! - a tag repeated under one parent collapses into an ordered list at the
//!   position of its first occurrence
//!
//! Attributes, comments and processing instructions are ignored.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Failed to parse XML: {0}")]
    ParseError(String),
    #[error("XML document has no root element")]
    NoRoot,
    #[error("XML document has more than one root element")]
    MultipleRoots,
    #[error("Unexpected end of document inside <{0}>")]
    Unterminated(String),
    #[error("Failed to write XML: {0}")]
    WriteError(String),
}

/// Value stored under a tag: a single node, or every same-tag sibling in document order
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    One(NormalizedNode),
    Many(Vec<NormalizedNode>),
}

impl NodeValue {
    /// View the value as a sequence; a single node is a one-element slice
    pub fn as_slice(&self) -> &[NormalizedNode] {
        match self {
            NodeValue::One(node) => std::slice::from_ref(node),
            NodeValue::Many(nodes) => nodes,
        }
    }
}

/// A node of the normalized tree
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedNode {
    tag: String,
    /// `Some` for leaves only
    text: Option<String>,
    children: Vec<(String, NodeValue)>,
}

impl NormalizedNode {
    /// Build a leaf node
    pub fn leaf(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    /// Build an element node from its children, collapsing repeated tags
    pub fn element(tag: impl Into<String>, children: impl IntoIterator<Item = NormalizedNode>) -> Self {
        let mut node = Self {
            tag: tag.into(),
            text: None,
            children: Vec::new(),
        };
        for child in children {
            node.push_child(child);
        }
        if node.children.is_empty() {
            node.text = Some(String::new());
        }
        node
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Text of a leaf; `None` for elements with children
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Child entries in document order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &NodeValue)> {
        self.children.iter().map(|(tag, value)| (tag.as_str(), value))
    }

    /// All children with the given tag (empty when absent)
    pub fn children(&self, tag: &str) -> &[NormalizedNode] {
        self.children
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, value)| value.as_slice())
            .unwrap_or(&[])
    }

    /// First child with the given tag
    pub fn child(&self, tag: &str) -> Option<&NormalizedNode> {
        self.children(tag).first()
    }

    /// First child with any of the given tags, tried in order
    pub fn child_any(&self, tags: &[&str]) -> Option<&NormalizedNode> {
        tags.iter().find_map(|tag| self.child(tag))
    }

    /// Trimmed, non-empty text of a leaf child
    pub fn field(&self, tag: &str) -> Option<&str> {
        self.children(tag)
            .iter()
            .filter_map(|n| n.text())
            .map(str::trim)
            .find(|t| !t.is_empty())
    }

    /// First non-empty leaf field among `tags`, tried in order
    pub fn field_any(&self, tags: &[&str]) -> Option<&str> {
        tags.iter().find_map(|tag| self.field(tag))
    }

    /// Trimmed, non-empty text of this node when it is a leaf
    pub fn own_text(&self) -> Option<&str> {
        self.text().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Collect every descendant (self included) whose tag is in `tags`.
    ///
    /// A matching node is not searched further, so the result does not depend
    /// on how deeply the matches are wrapped.
    pub fn find_all<'a>(&'a self, tags: &[&str], out: &mut Vec<&'a NormalizedNode>) {
        if tags.contains(&self.tag.as_str()) {
            out.push(self);
            return;
        }
        for (_, value) in &self.children {
            for child in value.as_slice() {
                child.find_all(tags, out);
            }
        }
    }

    /// First non-empty leaf anywhere below this node whose tag is in `tags`
    pub fn find_field(&self, tags: &[&str]) -> Option<&str> {
        if let Some(text) = self.field_any(tags) {
            return Some(text);
        }
        self.children
            .iter()
            .flat_map(|(_, value)| value.as_slice())
            .find_map(|child| child.find_field(tags))
    }

    /// Convert into a JSON value for opaque descriptive payloads
    pub fn to_json(&self) -> Value {
        if let Some(text) = &self.text {
            return Value::String(text.clone());
        }
        let mut map = Map::new();
        for (tag, value) in &self.children {
            let json = match value {
                NodeValue::One(node) => node.to_json(),
                NodeValue::Many(nodes) => Value::Array(nodes.iter().map(|n| n.to_json()).collect()),
            };
            map.insert(tag.clone(), json);
        }
        Value::Object(map)
    }

    /// Serialize back to XML; normalizing the result yields an identical tree
    pub fn to_xml(&self) -> Result<String, NormalizeError> {
        let mut writer = Writer::new(Vec::new());
        write_node(&mut writer, self)?;
        String::from_utf8(writer.into_inner()).map_err(|e| NormalizeError::WriteError(e.to_string()))
    }

    fn push_child(&mut self, child: NormalizedNode) {
        match self.children.iter().position(|(t, _)| *t == child.tag) {
            Some(idx) => {
                let value = &mut self.children[idx].1;
                let previous = std::mem::replace(value, NodeValue::Many(Vec::new()));
                *value = match previous {
                    NodeValue::One(first) => NodeValue::Many(vec![first, child]),
                    NodeValue::Many(mut nodes) => {
                        nodes.push(child);
                        NodeValue::Many(nodes)
                    }
                };
            }
            None => self.children.push((child.tag.clone(), NodeValue::One(child))),
        }
    }
}

/// Strip a namespace prefix (`ns:Tag`) or Clark-notation namespace (`{urn}Tag`)
pub fn strip_namespace(tag: &str) -> &str {
    let tag = tag.rsplit_once('}').map(|(_, t)| t).unwrap_or(tag);
    tag.rsplit_once(':').map(|(_, t)| t).unwrap_or(tag)
}

/// Element being assembled while reading
struct Frame {
    tag: String,
    text: String,
    node: NormalizedNode,
}

impl Frame {
    fn open(raw_name: &[u8]) -> Self {
        let name = String::from_utf8_lossy(raw_name);
        let tag = strip_namespace(&name).to_string();
        Self {
            node: NormalizedNode {
                tag: tag.clone(),
                text: None,
                children: Vec::new(),
            },
            tag,
            text: String::new(),
        }
    }

    fn close(self) -> NormalizedNode {
        let mut node = self.node;
        if node.children.is_empty() {
            node.text = Some(self.text.trim().to_string());
        }
        node
    }
}

/// Normalize an XML document into a tree rooted at its document element
pub fn normalize(xml: &[u8]) -> Result<NormalizedNode, NormalizeError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<NormalizedNode> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| NormalizeError::ParseError(e.to_string()))?;

        match event {
            Event::Start(e) => {
                if root.is_some() {
                    return Err(NormalizeError::MultipleRoots);
                }
                stack.push(Frame::open(e.name().as_ref()));
            }
            Event::Empty(e) => {
                let node = Frame::open(e.name().as_ref()).close();
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| NormalizeError::ParseError(e.to_string()))?;
                    frame.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| NormalizeError::ParseError("unmatched end tag".to_string()))?;
                attach(&mut stack, &mut root, frame.close())?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.pop() {
        return Err(NormalizeError::Unterminated(open.tag));
    }
    root.ok_or(NormalizeError::NoRoot)
}

fn attach(
    stack: &mut [Frame],
    root: &mut Option<NormalizedNode>,
    node: NormalizedNode,
) -> Result<(), NormalizeError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.node.push_child(node);
            Ok(())
        }
        None if root.is_some() => Err(NormalizeError::MultipleRoots),
        None => {
            *root = Some(node);
            Ok(())
        }
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &NormalizedNode) -> Result<(), NormalizeError> {
    let err = |e: std::io::Error| NormalizeError::WriteError(e.to_string());

    writer
        .write_event(Event::Start(BytesStart::new(node.tag.as_str())))
        .map_err(err)?;
    if let Some(text) = &node.text {
        if !text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(err)?;
        }
    }
    for (_, value) in &node.children {
        for child in value.as_slice() {
            write_node(writer, child)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.tag.as_str())))
        .map_err(err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1">
  <nc:data>
    <eq:equipment xmlns:eq="urn:example:equipment">
      <eq:computerSystem>
        <eq:computerSystemId>srv1</eq:computerSystemId>
        <eq:networkInterface><eq:name>eth0</eq:name></eq:networkInterface>
        <eq:label/>
        <eq:networkInterface><eq:name>eth1</eq:name></eq:networkInterface>
      </eq:computerSystem>
      <eq:note>a &amp; b</eq:note>
    </eq:equipment>
  </nc:data>
</nc:rpc-reply>"#;

    #[test]
    fn test_strip_namespace() {
        assert_eq!(strip_namespace("{urn:ietf:params}data"), "data");
        assert_eq!(strip_namespace("nc:data"), "data");
        assert_eq!(strip_namespace("data"), "data");
    }

    #[test]
    fn test_normalize_strips_namespaces_and_collapses_repeats() {
        let tree = normalize(REPLY.as_bytes()).unwrap();
        assert_eq!(tree.tag(), "rpc-reply");

        let system = tree
            .child("data")
            .and_then(|d| d.child("equipment"))
            .and_then(|e| e.child("computerSystem"))
            .unwrap();
        assert_eq!(system.field("computerSystemId"), Some("srv1"));

        // Interleaved repeats collapse at the first position, in document order
        let tags: Vec<_> = system.entries().map(|(t, _)| t).collect();
        assert_eq!(tags, vec!["computerSystemId", "networkInterface", "label"]);
        let names: Vec<_> = system
            .children("networkInterface")
            .iter()
            .filter_map(|i| i.field("name"))
            .collect();
        assert_eq!(names, vec!["eth0", "eth1"]);
    }

    #[test]
    fn test_leaf_text_is_never_none() {
        let tree = normalize(REPLY.as_bytes()).unwrap();
        let equipment = tree.child("data").unwrap().child("equipment").unwrap();
        let label = equipment.child("computerSystem").unwrap().child("label").unwrap();
        assert_eq!(label.text(), Some(""));
        assert_eq!(equipment.field("note"), Some("a & b"));
        assert_eq!(equipment.text(), None);
    }

    #[test]
    fn test_single_value_reads_as_one_element_sequence() {
        let tree = normalize(b"<a><b>1</b></a>").unwrap();
        assert_eq!(tree.children("b").len(), 1);
        assert!(tree.children("missing").is_empty());
    }

    #[test]
    fn test_renormalizing_serialized_tree_is_identical() {
        let docs = [
            REPLY,
            "<root/>",
            "<root><a>1</a><b><c>x &lt; y</c></b><a>2</a><a></a></root>",
            "<r><x><y><z>deep</z></y></x><x/></r>",
        ];
        for doc in docs {
            let tree = normalize(doc.as_bytes()).unwrap();
            let xml = tree.to_xml().unwrap();
            let again = normalize(xml.as_bytes()).unwrap();
            assert_eq!(tree, again, "round trip changed tree for {}", doc);
        }
    }

    #[test]
    fn test_find_all_stops_at_matches() {
        let tree = normalize(b"<r><w><s><id>1</id><s><id>nested</id></s></s></w><s><id>2</id></s></r>").unwrap();
        let mut found = Vec::new();
        tree.find_all(&["s"], &mut found);
        let ids: Vec<_> = found.iter().filter_map(|n| n.field("id")).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_to_json() {
        let tree = normalize(b"<disk><size>100</size><part>a</part><part>b</part></disk>").unwrap();
        assert_eq!(
            tree.to_json(),
            serde_json::json!({ "size": "100", "part": ["a", "b"] })
        );
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(normalize(b""), Err(NormalizeError::NoRoot)));
        assert!(matches!(normalize(b"<a><b></a>"), Err(NormalizeError::ParseError(_))));
        assert!(matches!(normalize(b"<a></a><b></b>"), Err(NormalizeError::MultipleRoots)));
        assert!(matches!(
            normalize(b"<a><b>"),
            Err(NormalizeError::Unterminated(_)) | Err(NormalizeError::ParseError(_))
        ));
    }
}
