//! Poll-driven RFC 6455 WebSocket client.
//!
//! The engine ([`WsClient`]) does no work on its own: a host loop calls
//! [`WsClient::poll`] every tick, and connecting, retrying, frame decoding and
//! event dispatch all happen inside that call.

pub mod auth;
pub mod codec;
pub mod config;
pub(crate) mod diag;
pub mod error;
pub mod events;
pub mod net;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ClientConfig, MaskMode};
pub use error::{ConfigError, HandshakeError, ProtocolViolation, WsError, WsResult};
pub use net::framing::Opcode;
pub use net::transport::{TcpTransport, Transport};
pub use net::ws_client::{ConnectionState, Endpoint, WsClient};
