//! HTTP/1.1 upgrade exchange.

use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use crate::auth::nonce::accept_key;
use crate::error::HandshakeError;
use crate::net::transport::Transport;

/// Prefix of the only status line that counts as success.
const SWITCHING_PROTOCOLS: &str = "HTTP/1.1 101";

/// Request parameters. Lines are rendered in a fixed order.
#[derive(Debug, Clone)]
pub struct HandshakeRequest<'a> {
    pub host: &'a str,
    pub path: &'a str,
    pub protocol: Option<&'a str>,
    pub origin: &'a str,
    pub key: &'a str,
}

impl HandshakeRequest<'_> {
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(256);
        // Writing into a String cannot fail.
        let _ = write!(out, "GET {} HTTP/1.1\r\n", self.path);
        out.push_str("Upgrade: WebSocket\r\n");
        out.push_str("Connection: Upgrade\r\n");
        let _ = write!(out, "Host: {}\r\n", self.host);
        let _ = write!(out, "Sec-WebSocket-Origin: {}\r\n", self.origin);
        out.push_str("Sec-WebSocket-Version: 13\r\n");
        let _ = write!(out, "Sec-WebSocket-Key: {}\r\n", self.key);
        if let Some(protocol) = self.protocol {
            let _ = write!(out, "Sec-WebSocket-Protocol: {}\r\n", protocol);
        }
        out.push_str("\r\n");
        out
    }
}

/// What the server answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// First non-empty line received.
    pub status_line: Option<String>,
    /// Some line began with `HTTP/1.1 101`.
    pub switching: bool,
    pub accept: Option<String>,
    pub protocol: Option<String>,
}

/// Line splitter for the response head. CR is dropped, LF ends a line, an
/// empty line ends the head.
#[derive(Debug, Default)]
pub struct ResponseParser {
    line: Vec<u8>,
    response: HandshakeResponse,
    saw_bytes: bool,
    done: bool,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte. Returns true once the blank terminator line is seen.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.done {
            return true;
        }
        self.saw_bytes = true;
        match byte {
            b'\r' => {}
            b'\n' => {
                if self.line.is_empty() {
                    self.done = true;
                } else {
                    self.finish_line();
                }
            }
            other => self.line.push(other),
        }
        self.done
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn saw_bytes(&self) -> bool {
        self.saw_bytes
    }

    pub fn into_response(self) -> HandshakeResponse {
        self.response
    }

    fn finish_line(&mut self) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        if line.starts_with(SWITCHING_PROTOCOLS) {
            self.response.switching = true;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("sec-websocket-accept") {
                self.response.accept = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case("sec-websocket-protocol") {
                self.response.protocol = Some(value.trim().to_string());
            }
        }
        if self.response.status_line.is_none() {
            self.response.status_line = Some(line);
        }
    }
}

/// Reads the response head from `transport`, one byte at a time so nothing
/// past the blank line is consumed.
///
/// Blocks for at most `attempts * delay`: each time the transport has nothing
/// ready, one attempt is spent sleeping. The same budget covers the wait for
/// the first byte and any stall mid-response.
pub fn read_response<T: Transport + ?Sized>(
    transport: &mut T,
    attempts: u32,
    delay: Duration,
) -> Result<HandshakeResponse, HandshakeError> {
    let mut parser = ResponseParser::new();
    let mut budget = attempts;

    while !parser.is_done() {
        if transport.available() == 0 {
            if budget == 0 || !transport.is_connected() {
                return Err(if parser.saw_bytes() {
                    HandshakeError::Incomplete
                } else {
                    HandshakeError::NoResponse
                });
            }
            budget -= 1;
            thread::sleep(delay);
            continue;
        }

        while let Some(byte) = transport.read_byte() {
            if parser.push(byte) {
                break;
            }
        }
    }

    let response = parser.into_response();
    if !response.switching {
        return Err(HandshakeError::BadStatus(
            response.status_line.unwrap_or_default(),
        ));
    }
    Ok(response)
}

/// Checks `Sec-WebSocket-Accept` against the key that was sent.
pub fn verify_accept(response: &HandshakeResponse, key: &str) -> Result<(), HandshakeError> {
    let expected = accept_key(key);
    match response.accept.as_deref() {
        None => Err(HandshakeError::MissingAccept),
        Some(received) if received == expected => Ok(()),
        Some(received) => Err(HandshakeError::AcceptMismatch {
            expected,
            received: received.to_string(),
        }),
    }
}
