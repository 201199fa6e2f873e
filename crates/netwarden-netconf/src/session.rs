//! NETCONF sessions: open, read device state, close
//!
//! A read first asks for the scoped subtree only. Devices that reject the
//! filter, or answer with an empty `<data/>`, get exactly one unfiltered
//! retry; the [`ReadScope`] of the response tells the extractor which
//! strategy fits.

use async_trait::async_trait;
use netwarden_core::device::Device;
use netwarden_core::extract::ReadScope;
use netwarden_core::tree::normalize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::framing::{self, FrameDecoder, Reply};
use crate::transport::{SshTransport, Transport, TransportError};

/// Default bound on opening a session
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on a single RPC round trip
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on the `<close-session/>` round trip
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Subtree filter selecting the equipment inventory
pub const DEFAULT_SCOPE_FILTER: &str = "<equipment/>";

/// Failure to open a session
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Authentication rejected for user '{0}'")]
    AuthRejected(String),
    #[error("Device unreachable: {0}")]
    Unreachable(String),
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
    #[error("Host key not in the accepted list")]
    HostKeyRejected,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Failure to read device state over an open session
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("No response within {0:?}")]
    Timeout(Duration),
}

impl ReadError {
    /// Whether an unfiltered retry may help
    fn is_retryable(&self) -> bool {
        matches!(self, ReadError::Rejected(_) | ReadError::Malformed(_))
    }
}

/// Raw `<rpc-reply>` carrying device state
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub xml: Vec<u8>,
    pub scope: ReadScope,
}

/// Session timeouts and host key policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Accepted host key fingerprints; empty accepts any
    pub known_host_keys: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            known_host_keys: Vec::new(),
        }
    }
}

/// An open management session to one device
#[async_trait]
pub trait DeviceSession: Send {
    /// Read device state, scoped by `scope_filter` when given
    async fn read(&mut self, scope_filter: Option<&str>) -> Result<RawResponse, ReadError>;

    /// Best-effort close
    async fn close(self: Box<Self>);
}

/// Opens sessions to devices
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError>;
}

/// NETCONF 1.0 session over any [`Transport`]
pub struct NetconfSession<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    next_message_id: u32,
    read_timeout: Duration,
    session_id: Option<String>,
}

impl<T: Transport> NetconfSession<T> {
    /// Exchange hellos over a fresh transport
    pub async fn establish(transport: T, read_timeout: Duration) -> Result<Self, ConnectError> {
        let mut session = Self {
            transport,
            decoder: FrameDecoder::new(),
            next_message_id: 1,
            read_timeout,
            session_id: None,
        };

        let hello = framing::hello().map_err(|e| ConnectError::Protocol(e.to_string()))?;
        session
            .send_message(&hello)
            .await
            .map_err(|e| ConnectError::Protocol(e.to_string()))?;

        let server_hello = match timeout(read_timeout, session.recv_message()).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Err(ConnectError::Protocol(e.to_string())),
            Err(_) => return Err(ConnectError::Timeout(read_timeout)),
        };
        let tree = normalize(&server_hello).map_err(|e| ConnectError::Protocol(e.to_string()))?;
        if tree.tag() != "hello" {
            return Err(ConnectError::Protocol(format!(
                "expected <hello>, got <{}>",
                tree.tag()
            )));
        }
        session.session_id = tree.field("session-id").map(str::to_string);

        debug!(session_id = ?session.session_id, "NETCONF hello exchanged");
        Ok(session)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn send_message(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.transport.send(&framing::encode(message)).await
    }

    async fn recv_message(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(frame);
            }
            match self.transport.recv().await? {
                Some(chunk) => self.decoder.push(&chunk)?,
                None => return Err(TransportError::Closed),
            }
        }
    }

    fn take_message_id(&mut self) -> u32 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    /// Send one RPC and wait up to `bound` for its reply
    async fn round_trip(&mut self, request: Vec<u8>, bound: Duration) -> Result<Vec<u8>, ReadError> {
        let exchange = async {
            self.send_message(&request).await?;
            self.recv_message().await
        };
        match timeout(bound, exchange).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ReadError::Timeout(bound)),
        }
    }

    /// One `<get>`, returning the reply only if it carries data
    async fn get(&mut self, subtree_filter: Option<&str>) -> Result<Vec<u8>, ReadError> {
        let message_id = self.take_message_id();
        let request = framing::get(message_id, subtree_filter)
            .map_err(|e| ReadError::Malformed(e.to_string()))?;
        let reply = self.round_trip(request, self.read_timeout).await?;

        match framing::classify_reply(&reply) {
            Ok(Reply::Data) => Ok(reply),
            Ok(Reply::EmptyData) if subtree_filter.is_some() => {
                Err(ReadError::Rejected("empty data for filtered get".to_string()))
            }
            // An empty unfiltered read is still an answer
            Ok(Reply::EmptyData) => Ok(reply),
            Ok(Reply::Error(message)) => Err(ReadError::Rejected(message)),
            Ok(Reply::Ok) => Err(ReadError::Malformed("<ok/> in reply to <get>".to_string())),
            Ok(Reply::Unexpected(what)) => Err(ReadError::Malformed(what)),
            Err(e) => Err(ReadError::Malformed(e.to_string())),
        }
    }

    /// Read device state, falling back once to an unfiltered read
    pub async fn read_state(
        &mut self,
        scope_filter: Option<&str>,
    ) -> Result<RawResponse, ReadError> {
        if let Some(filter) = scope_filter {
            match self.get(Some(filter)).await {
                Ok(xml) => {
                    return Ok(RawResponse {
                        xml,
                        scope: ReadScope::Filtered,
                    })
                }
                Err(e) if e.is_retryable() => {
                    info!(session_id = ?self.session_id, error = %e, "Scoped read failed, retrying unfiltered");
                }
                Err(e) => return Err(e),
            }
        }

        let xml = self.get(None).await?;
        Ok(RawResponse {
            xml,
            scope: ReadScope::Full,
        })
    }

    /// Send `<close-session/>` and drop the transport; never fails
    pub async fn shutdown(mut self) {
        let message_id = self.take_message_id();
        match framing::close_session(message_id) {
            Ok(request) => {
                let bound = self.read_timeout.min(CLOSE_TIMEOUT);
                if let Err(e) = self.round_trip(request, bound).await {
                    debug!(error = %e, "close-session not acknowledged");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode close-session"),
        }
        self.transport.close().await;
    }
}

#[async_trait]
impl<T: Transport + 'static> DeviceSession for NetconfSession<T> {
    async fn read(&mut self, scope_filter: Option<&str>) -> Result<RawResponse, ReadError> {
        self.read_state(scope_filter).await
    }

    async fn close(self: Box<Self>) {
        (*self).shutdown().await
    }
}

/// Opens NETCONF sessions over SSH
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: SessionConfig,
    known_host_keys: Arc<Vec<String>>,
}

impl SshConnector {
    pub fn new(config: SessionConfig) -> Self {
        let known_host_keys = Arc::new(config.known_host_keys.clone());
        Self {
            config,
            known_host_keys,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn open_session(
        &self,
        device: &Device,
    ) -> Result<NetconfSession<SshTransport>, ConnectError> {
        let transport = SshTransport::connect(
            device,
            self.known_host_keys.clone(),
            self.config.read_timeout,
        )
        .await?;
        NetconfSession::establish(transport, self.config.read_timeout).await
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError> {
        let connect_timeout = self.config.connect_timeout;
        match timeout(connect_timeout, self.open_session(device)).await {
            Ok(Ok(session)) => {
                info!(device = %device.id, session_id = ?session.session_id(), "NETCONF session opened");
                Ok(Box::new(session))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Timeout(connect_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const SERVER_HELLO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>
  <session-id>42</session-id>
</hello>]]>]]>"#;

    const DATA_REPLY: &str = r#"<rpc-reply message-id="1"><data><equipment><switch><switchId>sw1</switchId></switch></equipment></data></rpc-reply>]]>]]>"#;
    const EMPTY_REPLY: &str = r#"<rpc-reply message-id="1"><data/></rpc-reply>]]>]]>"#;
    const ERROR_REPLY: &str = r#"<rpc-reply message-id="1"><rpc-error><error-tag>operation-not-supported</error-tag></rpc-error></rpc-reply>]]>]]>"#;
    const OK_REPLY: &str = r#"<rpc-reply message-id="9"><ok/></rpc-reply>]]>]]>"#;

    /// Transport replaying scripted chunks and recording what was sent
    struct ScriptedTransport {
        incoming: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<String>>>,
        stall: bool,
        closed: Arc<Mutex<bool>>,
    }

    impl ScriptedTransport {
        fn new(chunks: &[&str]) -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                incoming: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                sent: sent.clone(),
                stall: false,
                closed: Arc::new(Mutex::new(false)),
            };
            (transport, sent)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            match self.incoming.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None if self.stall => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    async fn session(chunks: &[&str]) -> (NetconfSession<ScriptedTransport>, Arc<Mutex<Vec<String>>>) {
        let (transport, sent) = ScriptedTransport::new(chunks);
        let session = NetconfSession::establish(transport, Duration::from_secs(5))
            .await
            .unwrap();
        (session, sent)
    }

    #[tokio::test]
    async fn test_hello_exchange() {
        // Hello split across chunks
        let (first, second) = SERVER_HELLO.split_at(40);
        let (session, sent) = session(&[first, second]).await;

        assert_eq!(session.session_id(), Some("42"));
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("<hello"));
        assert!(sent[0].ends_with("]]>]]>"));
    }

    #[tokio::test]
    async fn test_missing_hello_is_protocol_error() {
        let (transport, _) = ScriptedTransport::new(&[DATA_REPLY]);
        let result = NetconfSession::establish(transport, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ConnectError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_scoped_read() {
        let (mut session, sent) = session(&[SERVER_HELLO, DATA_REPLY]).await;
        let response = session.read_state(Some(DEFAULT_SCOPE_FILTER)).await.unwrap();

        assert_eq!(response.scope, ReadScope::Filtered);
        assert!(String::from_utf8_lossy(&response.xml).contains("sw1"));
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains(r#"<filter type="subtree"><equipment/></filter>"#));
    }

    #[tokio::test]
    async fn test_rejected_filter_falls_back_to_full_read() {
        let (mut session, sent) = session(&[SERVER_HELLO, ERROR_REPLY, DATA_REPLY]).await;
        let response = session.read_state(Some(DEFAULT_SCOPE_FILTER)).await.unwrap();

        assert_eq!(response.scope, ReadScope::Full);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent[2].contains("<get/>"));
        assert!(sent[2].contains(r#"message-id="2""#));
    }

    #[tokio::test]
    async fn test_empty_data_falls_back_to_full_read() {
        let (mut session, _) = session(&[SERVER_HELLO, EMPTY_REPLY, DATA_REPLY]).await;
        let response = session.read_state(Some(DEFAULT_SCOPE_FILTER)).await.unwrap();
        assert_eq!(response.scope, ReadScope::Full);
    }

    #[tokio::test]
    async fn test_only_one_retry() {
        let (mut session, sent) = session(&[SERVER_HELLO, ERROR_REPLY, ERROR_REPLY]).await;
        let result = session.read_state(Some(DEFAULT_SCOPE_FILTER)).await;

        assert!(matches!(result, Err(ReadError::Rejected(ref m)) if m == "operation-not-supported"));
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unfiltered_read_goes_straight_to_full() {
        let (mut session, sent) = session(&[SERVER_HELLO, EMPTY_REPLY]).await;
        let response = session.read_state(None).await.unwrap();

        assert_eq!(response.scope, ReadScope::Full);
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_channel_is_transport_error() {
        let (mut session, sent) = session(&[SERVER_HELLO]).await;
        let result = session.read_state(Some(DEFAULT_SCOPE_FILTER)).await;

        assert!(matches!(result, Err(ReadError::Transport(TransportError::Closed))));
        // Transport failures are not retried
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (mut transport, _) = ScriptedTransport::new(&[SERVER_HELLO]);
        transport.stall = true;
        let mut session = NetconfSession::establish(transport, Duration::from_millis(50))
            .await
            .unwrap();

        let result = session.read_state(None).await;
        assert!(matches!(result, Err(ReadError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_close_is_best_effort() {
        let (transport, sent) = ScriptedTransport::new(&[SERVER_HELLO, OK_REPLY]);
        let closed = transport.closed.clone();
        let session = NetconfSession::establish(transport, Duration::from_secs(5))
            .await
            .unwrap();
        Box::new(session).close().await;

        assert!(*closed.lock().unwrap());
        assert!(sent.lock().unwrap()[1].contains("<close-session/>"));

        // A dead channel still closes cleanly
        let (transport, _) = ScriptedTransport::new(&[SERVER_HELLO]);
        let closed = transport.closed.clone();
        let session = NetconfSession::establish(transport, Duration::from_secs(5))
            .await
            .unwrap();
        session.shutdown().await;
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_read_timeout() {
        let (mut transport, sent) = ScriptedTransport::new(&[SERVER_HELLO]);
        transport.stall = true;
        let closed = transport.closed.clone();
        let session = NetconfSession::establish(transport, Duration::from_secs(60))
            .await
            .unwrap();

        // Peer never answers close-session
        timeout(CLOSE_TIMEOUT + Duration::from_secs(3), session.shutdown())
            .await
            .expect("close waited for the read timeout");
        assert!(*closed.lock().unwrap());
        assert!(sent.lock().unwrap()[1].contains("<close-session/>"));
    }
}
