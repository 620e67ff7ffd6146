//! Error taxonomy for the engine.
//!
//! Every variant is recoverable at connection scope: the engine reports it
//! through the error event and either stays open (discarding the offending
//! message) or falls back to `Disconnected` and retries.

use std::io;

/// Convenience result alias for engine operations.
pub type WsResult<T> = Result<T, WsError>;

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("connect to {host}:{port} failed: {source}")]
    TransportConnect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("not connected")]
    NotConnected,

    #[error("reconnect in progress")]
    ReconnectInFlight,

    #[error("client is not active; call connect first")]
    Inactive,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons the HTTP upgrade exchange did not produce an open connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("no response from server")]
    NoResponse,

    #[error("response ended before the blank line")]
    Incomplete,

    #[error("unexpected status line: {0:?}")]
    BadStatus(String),

    #[error("Sec-WebSocket-Accept missing from response")]
    MissingAccept,

    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, received {received}")]
    AcceptMismatch { expected: String, received: String },
}

/// Frames a server must never send to a client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("server sent a masked frame")]
    MaskedServerFrame,

    #[error("reserved opcode 0x{0:X}")]
    ReservedOpcode(u8),

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("fragmented control frame")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLong(u64),

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised while loading [`crate::config::ClientConfig`] from the
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
