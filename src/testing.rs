//! Test doubles: a scripted in-memory transport and a deterministic random
//! source. Used by the unit tests and the scenario tests under `tests/`.
//! Outside this crate's own tests it needs the `testing` feature.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::rc::Rc;

use crate::auth::nonce::RandomSource;
use crate::net::framing::{encode_frame, ByteSource, Opcode};
use crate::net::transport::Transport;

/// Canned successful upgrade response.
pub const SWITCHING_RESPONSE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
\r\n";

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    connect_plan: VecDeque<bool>,
    on_connect: VecDeque<Vec<u8>>,
    last_endpoint: Option<(String, u16)>,
    connects: usize,
    closes: usize,
    available_calls: usize,
}

/// In-memory transport. The test scripts and inspects it through a
/// [`MockHandle`] while the client owns the transport itself.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Rc::clone(&self.state),
        }
    }
}

impl MockHandle {
    /// Makes the next connect fail. Stacks with further calls.
    pub fn fail_next_connect(&self) {
        self.state.borrow_mut().connect_plan.push_back(false);
    }

    /// Bytes delivered right after the next successful connect, typically
    /// a handshake response.
    pub fn on_next_connect(&self, bytes: &[u8]) {
        self.state.borrow_mut().on_connect.push_back(bytes.to_vec());
    }

    /// Queues [`SWITCHING_RESPONSE`] for the next successful connect.
    pub fn accept_next_handshake(&self) {
        self.on_next_connect(SWITCHING_RESPONSE);
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Queues an unmasked frame as a server would send it.
    pub fn push_frame(&self, fin: bool, opcode: Opcode, payload: &[u8]) {
        self.push_inbound(&server_frame(fin, opcode, payload));
    }

    pub fn inbound_len(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    /// Peer hangs up. Already queued bytes stay readable.
    pub fn drop_peer(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().written)
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.state.borrow().written).into_owned()
    }

    pub fn last_endpoint(&self) -> Option<(String, u16)> {
        self.state.borrow().last_endpoint.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.borrow().connects
    }

    pub fn closes(&self) -> usize {
        self.state.borrow().closes
    }

    pub fn available_calls(&self) -> usize {
        self.state.borrow().available_calls
    }
}

impl ByteSource for MockTransport {
    fn available(&mut self) -> usize {
        let mut state = self.state.borrow_mut();
        state.available_calls += 1;
        state.inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        ByteSource::read(&mut self.state.borrow_mut().inbound, buf)
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.connects += 1;
        state.last_endpoint = Some((host.to_string(), port));
        if !state.connect_plan.pop_front().unwrap_or(true) {
            return Err(io::Error::from(ErrorKind::ConnectionRefused));
        }
        state.connected = true;
        state.inbound.clear();
        if let Some(bytes) = state.on_connect.pop_front() {
            state.inbound.extend(bytes);
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(io::Error::from(ErrorKind::NotConnected));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.closes += 1;
        state.connected = false;
        state.inbound.clear();
    }

    fn is_connected(&self) -> bool {
        let state = self.state.borrow();
        state.connected || !state.inbound.is_empty()
    }
}

/// Deterministic [`RandomSource`]: yields `start`, `start + 1`, ...
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    next: u8,
}

impl SequenceRandom {
    pub fn new(start: u8) -> Self {
        Self { next: start }
    }
}

impl Default for SequenceRandom {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RandomSource for SequenceRandom {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest {
            *b = self.next;
            self.next = self.next.wrapping_add(1);
        }
    }
}

/// Unmasked frame bytes, as sent server to client.
pub fn server_frame(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_frame(fin, opcode, payload, None, &mut out);
    out
}
