//! NetWarden NETCONF - NETCONF 1.0 client over SSH
//!
//! This crate opens NETCONF sessions to managed devices and reads their state
//! for the discovery pipeline.

pub mod framing;
pub mod session;
pub mod transport;

pub use framing::{FrameDecoder, FramingError, Reply};
pub use session::{
    ConnectError, Connector, DeviceSession, NetconfSession, RawResponse, ReadError,
    SessionConfig, SshConnector, CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
    DEFAULT_SCOPE_FILTER,
};
pub use transport::{SshTransport, Transport, TransportError};
