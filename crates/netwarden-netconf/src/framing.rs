//! NETCONF 1.0 message framing and encoding
//!
//! Messages are XML documents terminated by the `]]>]]>` end-of-message
//! marker. This module splits a byte stream into messages, builds the few
//! client messages we send, and classifies server replies.

use netwarden_core::tree::{normalize, NormalizeError, NormalizedNode};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;
use tracing::trace;

/// End-of-message marker
pub const EOM: &[u8] = b"]]>]]>";

/// NETCONF base namespace
pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Capability advertised in our hello
pub const BASE_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";

/// Largest message accepted before giving up on finding a marker
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("Message exceeds {0} bytes without end-of-message marker")]
    MessageTooLarge(usize),
    #[error("XML write error: {0}")]
    WriteError(String),
}

impl From<std::io::Error> for FramingError {
    fn from(e: std::io::Error) -> Self {
        FramingError::WriteError(e.to_string())
    }
}

/// Splits received bytes into end-of-message delimited frames
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset where the next marker search starts
    scanned: usize,
    max_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_size,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > self.max_size && self.find_marker().is_none() {
            return Err(FramingError::MessageTooLarge(self.max_size));
        }
        Ok(())
    }

    /// Take the next complete message, without its marker and surrounding
    /// whitespace
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.find_marker()?;
        let frame: Vec<u8> = self.buffer.drain(..end + EOM.len()).take(end).collect();
        self.scanned = 0;
        trace!(bytes = frame.len(), "Decoded NETCONF frame");
        Some(frame.trim_ascii().to_vec())
    }

    /// Bytes received but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Search only the bytes not yet scanned, plus enough overlap to catch
    /// a marker split across chunks
    fn find_marker(&mut self) -> Option<usize> {
        let start = self.scanned;
        match self.buffer[start..].windows(EOM.len()).position(|w| w == EOM) {
            Some(pos) => Some(start + pos),
            None => {
                self.scanned = self.buffer.len().saturating_sub(EOM.len() - 1);
                None
            }
        }
    }
}

/// Terminate a message with the end-of-message marker
pub fn encode(message: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(message.len() + EOM.len() + 1);
    framed.extend_from_slice(message);
    framed.push(b'\n');
    framed.extend_from_slice(EOM);
    framed
}

fn start_document() -> Result<Writer<Vec<u8>>, FramingError> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

/// Client `<hello>` advertising base 1.0 only
pub fn hello() -> Result<Vec<u8>, FramingError> {
    let mut writer = start_document()?;
    writer.write_event(Event::Start(
        BytesStart::new("hello").with_attributes([("xmlns", BASE_NS)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("capabilities")))?;
    writer.write_event(Event::Start(BytesStart::new("capability")))?;
    writer.write_event(Event::Text(BytesText::new(BASE_CAPABILITY)))?;
    writer.write_event(Event::End(BytesEnd::new("capability")))?;
    writer.write_event(Event::End(BytesEnd::new("capabilities")))?;
    writer.write_event(Event::End(BytesEnd::new("hello")))?;
    Ok(writer.into_inner())
}

fn rpc(
    message_id: u32,
    body: impl FnOnce(&mut Writer<Vec<u8>>) -> Result<(), FramingError>,
) -> Result<Vec<u8>, FramingError> {
    let id = message_id.to_string();
    let mut writer = start_document()?;
    writer.write_event(Event::Start(
        BytesStart::new("rpc").with_attributes([("message-id", id.as_str()), ("xmlns", BASE_NS)]),
    ))?;
    body(&mut writer)?;
    writer.write_event(Event::End(BytesEnd::new("rpc")))?;
    Ok(writer.into_inner())
}

/// `<get>` RPC, with the given subtree filter content when present
pub fn get(message_id: u32, subtree_filter: Option<&str>) -> Result<Vec<u8>, FramingError> {
    rpc(message_id, |writer| {
        match subtree_filter {
            Some(filter) => {
                writer.write_event(Event::Start(BytesStart::new("get")))?;
                writer.write_event(Event::Start(
                    BytesStart::new("filter").with_attributes([("type", "subtree")]),
                ))?;
                // Filter content is already XML
                writer.write_event(Event::Text(BytesText::from_escaped(filter)))?;
                writer.write_event(Event::End(BytesEnd::new("filter")))?;
                writer.write_event(Event::End(BytesEnd::new("get")))?;
            }
            None => {
                writer.write_event(Event::Empty(BytesStart::new("get")))?;
            }
        }
        Ok(())
    })
}

/// `<close-session/>` RPC
pub fn close_session(message_id: u32) -> Result<Vec<u8>, FramingError> {
    rpc(message_id, |writer| {
        writer.write_event(Event::Empty(BytesStart::new("close-session")))?;
        Ok(())
    })
}

/// Server reply to an RPC
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `<data>` with content
    Data,
    /// `<data/>` with nothing inside
    EmptyData,
    /// `<ok/>`
    Ok,
    /// `<rpc-error>`, with its message or tag
    Error(String),
    /// A well-formed document that is none of the above
    Unexpected(String),
}

/// Classify a `<rpc-reply>` document
pub fn classify_reply(message: &[u8]) -> Result<Reply, NormalizeError> {
    let tree = normalize(message)?;
    Ok(classify_tree(&tree))
}

fn classify_tree(tree: &NormalizedNode) -> Reply {
    if tree.tag() != "rpc-reply" {
        return Reply::Unexpected(tree.tag().to_string());
    }
    if let Some(error) = tree.children("rpc-error").first() {
        let message = error
            .field_any(&["error-message", "error-tag"])
            .unwrap_or("unspecified error");
        return Reply::Error(message.to_string());
    }
    if let Some(data) = tree.child("data") {
        return if data.is_leaf() {
            Reply::EmptyData
        } else {
            Reply::Data
        };
    }
    if tree.child("ok").is_some() {
        return Reply::Ok;
    }
    Reply::Unexpected("rpc-reply without data or ok".to_string())
}

/// Whether a message is a server `<hello>`
pub fn is_hello(message: &[u8]) -> bool {
    normalize(message)
        .map(|tree| tree.tag() == "hello")
        .unwrap_or(false)
}
