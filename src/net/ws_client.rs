use std::time::Instant;

use crate::auth::nonce::{generate_key, RandomSource, SystemEntropy};
use crate::config::{ClientConfig, MaskMode};
use crate::diag::diag;
use crate::error::{ProtocolViolation, WsError, WsResult};
use crate::events::Handlers;
use crate::net::framing::{encode_frame, Frame, FrameDecoder, Opcode};
use crate::net::handshake::{self, HandshakeRequest};
use crate::net::reassembly::{Assembled, ControlKind, DataKind, Reassembler};
use crate::net::transport::Transport;

/// Close code reported when a close frame carries no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close reasons must fit a 125-byte control payload after the 2-byte code.
const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HandshakeInFlight,
    Open,
    /// We sent a close frame and wait for the peer's.
    Closing,
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub protocol: Option<String>,
}

impl Endpoint {
    /// Endpoint at path `/` with no subprotocol.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            protocol: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }
}

/// Poll-driven WebSocket client.
///
/// Nothing happens between calls to [`WsClient::poll`]: the host loop calls
/// it every tick and all connecting, reading and dispatching runs inside
/// that call. Only the handshake wait may block, bounded by
/// `handshake_attempts * handshake_poll_delay`.
pub struct WsClient<T: Transport, R: RandomSource = SystemEntropy> {
    transport: T,
    rng: R,
    config: ClientConfig,
    endpoint: Option<Endpoint>,
    state: ConnectionState,
    active: bool,
    reconnecting: bool,
    retry_at: Instant,
    decoder: FrameDecoder,
    reassembler: Reassembler,
    handlers: Handlers,
    negotiated_protocol: Option<String>,
    out_buf: Vec<u8>,
}

impl<T: Transport> WsClient<T, SystemEntropy> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_random(transport, SystemEntropy::new(), config)
    }
}

impl<T: Transport, R: RandomSource> WsClient<T, R> {
    pub fn with_random(transport: T, rng: R, config: ClientConfig) -> Self {
        Self {
            transport,
            rng,
            config,
            endpoint: None,
            state: ConnectionState::Disconnected,
            active: false,
            reconnecting: false,
            retry_at: Instant::now(),
            decoder: FrameDecoder::new(),
            reassembler: Reassembler::new(),
            handlers: Handlers::default(),
            negotiated_protocol: None,
            out_buf: Vec::new(),
        }
    }

    pub fn on_open(&mut self, f: impl FnMut() + 'static) {
        self.handlers.open = Some(Box::new(f));
    }

    pub fn on_message(&mut self, f: impl FnMut(&str) + 'static) {
        self.handlers.message = Some(Box::new(f));
    }

    pub fn on_binary_message(&mut self, f: impl FnMut(&[u8]) + 'static) {
        self.handlers.binary = Some(Box::new(f));
    }

    pub fn on_close(&mut self, f: impl FnMut(u16, &str) + 'static) {
        self.handlers.close = Some(Box::new(f));
    }

    pub fn on_error(&mut self, f: impl FnMut(&WsError) + 'static) {
        self.handlers.error = Some(Box::new(f));
    }

    /// Fires after the automatic pong went out.
    pub fn on_ping(&mut self, f: impl FnMut(&[u8]) + 'static) {
        self.handlers.ping = Some(Box::new(f));
    }

    pub fn on_pong(&mut self, f: impl FnMut(&[u8]) + 'static) {
        self.handlers.pong = Some(Box::new(f));
    }

    /// Stores the endpoint and arms the client. The first connect attempt
    /// happens on the next [`WsClient::poll`].
    pub fn connect(&mut self, host: &str, port: u16, protocol: Option<&str>, path: &str) {
        let mut endpoint = Endpoint::new(host, port).path(path);
        endpoint.protocol = protocol.map(str::to_string);
        self.connect_to(endpoint);
    }

    pub fn connect_to(&mut self, endpoint: Endpoint) {
        diag!(
            self.config.log_level,
            Debug,
            "endpoint set to {}:{}{}",
            endpoint.host,
            endpoint.port,
            endpoint.path
        );
        self.endpoint = Some(endpoint);
        self.retry_at = Instant::now();
        self.active = true;
    }

    /// One non-blocking tick.
    pub fn poll(&mut self) {
        if !self.active || self.reconnecting {
            return;
        }

        match self.state {
            ConnectionState::Open | ConnectionState::Closing => {
                if !self.transport.is_connected() {
                    self.connection_lost();
                    return;
                }
                if let Err(e) = self.transport.flush() {
                    self.fail_session(WsError::Io(e));
                    return;
                }
                self.read_frame();
            }
            ConnectionState::Disconnected
            | ConnectionState::Connecting
            | ConnectionState::HandshakeInFlight => {
                let now = Instant::now();
                if now >= self.retry_at {
                    self.retry_at = now + self.config.retry_interval;
                    self.reconnecting = true;
                    self.reconnect();
                    self.reconnecting = false;
                }
            }
        }
    }

    /// Drops the transport now. The client stays armed, so the next eligible
    /// poll reconnects; use [`WsClient::shutdown`] to stop for good.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            diag!(self.config.log_level, Info, "disconnecting");
        }
        self.transport.close();
        self.reset_session();
    }

    /// Disconnects and disarms: no reconnects until the next `connect`.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.active = false;
    }

    pub fn send(&mut self, text: &str) -> WsResult<()> {
        self.check_sendable()?;
        self.write_frame(Opcode::Text, text.as_bytes())
    }

    pub fn send_binary(&mut self, data: &[u8]) -> WsResult<()> {
        self.check_sendable()?;
        self.write_frame(Opcode::Binary, data)
    }

    /// Starts the closing handshake. The session ends when the server's close
    /// frame arrives (or the connection drops).
    pub fn close(&mut self, code: u16, reason: &str) -> WsResult<()> {
        self.check_sendable()?;

        let mut cut = reason.len().min(MAX_CLOSE_REASON);
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut payload = Vec::with_capacity(2 + cut);
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason.as_bytes()[..cut]);

        self.write_frame(Opcode::Close, &payload)?;
        self.state = ConnectionState::Closing;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a session is up and the transport still has a peer or
    /// unread bytes.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Open | ConnectionState::Closing)
            && self.transport.is_connected()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Subprotocol the server selected in the last handshake.
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.negotiated_protocol.as_deref()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn check_sendable(&self) -> WsResult<()> {
        if !self.active {
            return Err(WsError::Inactive);
        }
        if self.reconnecting {
            return Err(WsError::ReconnectInFlight);
        }
        if self.state != ConnectionState::Open {
            return Err(WsError::NotConnected);
        }
        Ok(())
    }

    fn reconnect(&mut self) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };

        diag!(
            self.config.log_level,
            Info,
            "connecting to {}:{}{}",
            endpoint.host,
            endpoint.port,
            endpoint.path
        );
        self.state = ConnectionState::Connecting;

        match self.open_session(&endpoint) {
            Ok(()) => {
                self.state = ConnectionState::Open;
                diag!(self.config.log_level, Info, "connection open");
                self.handlers.open();
            }
            Err(err) => {
                self.transport.close();
                self.reset_session();
                diag!(self.config.log_level, Warn, "connection failed: {err}");
                self.handlers.error(&err);
            }
        }
    }

    fn open_session(&mut self, endpoint: &Endpoint) -> WsResult<()> {
        self.transport
            .connect(&endpoint.host, endpoint.port)
            .map_err(|source| WsError::TransportConnect {
                host: endpoint.host.clone(),
                port: endpoint.port,
                source,
            })?;

        self.state = ConnectionState::HandshakeInFlight;
        let key = generate_key(&mut self.rng);
        let request = HandshakeRequest {
            host: &endpoint.host,
            path: &endpoint.path,
            protocol: endpoint.protocol.as_deref(),
            origin: &self.config.origin,
            key: &key,
        }
        .render();
        diag!(self.config.log_level, Debug, "handshake request:\n{}", request.trim_end());

        self.transport.write_bytes(request.as_bytes())?;
        self.transport.flush()?;

        let response = handshake::read_response(
            &mut self.transport,
            self.config.handshake_attempts,
            self.config.handshake_poll_delay,
        )?;
        diag!(
            self.config.log_level,
            Debug,
            "handshake response: {}",
            response.status_line.as_deref().unwrap_or("")
        );
        if self.config.verify_accept {
            handshake::verify_accept(&response, &key)?;
        }

        self.decoder.reset();
        self.reassembler.discard();
        self.negotiated_protocol = response.protocol;
        Ok(())
    }

    /// Decodes at most one frame and dispatches what it completes.
    fn read_frame(&mut self) {
        let frame = match self.decoder.decode(&mut self.transport) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                self.fail_session(err);
                return;
            }
        };
        self.trace_frame(&frame);

        if frame.header.is_masked() {
            self.reassembler.discard();
            self.report(ProtocolViolation::MaskedServerFrame.into());
            return;
        }

        match self.reassembler.push(frame) {
            Ok(Assembled::Pending) => {}
            Ok(Assembled::Message { kind, payload }) => self.dispatch_message(kind, payload),
            Ok(Assembled::Control { kind, payload }) => self.dispatch_control(kind, payload),
            Err(violation) => self.report(violation.into()),
        }
    }

    fn trace_frame(&self, frame: &Frame) {
        let h = &frame.header;
        let shown = frame.payload.len().min(32);
        diag!(
            self.config.log_level,
            Trace,
            "frame fin={} op={:?} len={} mask={} data={}",
            h.fin,
            h.opcode,
            h.payload_len,
            h.mask.map(hex::encode).unwrap_or_else(|| "-".into()),
            hex::encode(&frame.payload[..shown])
        );
    }

    fn dispatch_message(&mut self, kind: DataKind, payload: Vec<u8>) {
        match kind {
            DataKind::Text => match String::from_utf8(payload) {
                Ok(text) => self.handlers.message(&text),
                Err(_) => self.report(ProtocolViolation::InvalidUtf8.into()),
            },
            DataKind::Binary => self.handlers.binary(&payload),
        }
    }

    fn dispatch_control(&mut self, kind: ControlKind, payload: Vec<u8>) {
        match kind {
            ControlKind::Ping => {
                if let Err(e) = self.write_pong(&payload) {
                    self.fail_session(e);
                    return;
                }
                self.handlers.ping(&payload);
            }
            ControlKind::Pong => self.handlers.pong(&payload),
            ControlKind::Close => self.on_close_frame(&payload),
        }
    }

    fn on_close_frame(&mut self, payload: &[u8]) {
        let (code, reason) = match payload {
            [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]), String::from_utf8_lossy(rest).into_owned()),
            _ => (CLOSE_NO_STATUS, String::new()),
        };
        diag!(self.config.log_level, Info, "server closed: code={code} reason={reason:?}");

        // Answer a server-initiated close unless we started the exchange.
        if self.state == ConnectionState::Open && self.config.mask_mode != MaskMode::Legacy {
            let echo: &[u8] = if payload.len() >= 2 { &payload[..2] } else { &[] };
            if let Err(e) = self.write_frame(Opcode::Close, echo) {
                diag!(self.config.log_level, Debug, "close reply not sent: {e}");
            }
        }

        self.handlers.close(code, &reason);
        self.transport.close();
        self.reset_session();
    }

    fn write_pong(&mut self, payload: &[u8]) -> WsResult<()> {
        match self.config.mask_mode {
            MaskMode::Legacy => {
                self.transport.write_bytes(&[0x8A, 0x00])?;
                Ok(())
            }
            MaskMode::Random => self.write_frame(Opcode::Pong, payload),
        }
    }

    fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> WsResult<()> {
        let mask = self.next_mask();
        self.out_buf.clear();
        encode_frame(true, opcode, payload, Some(mask), &mut self.out_buf);
        diag!(
            self.config.log_level,
            Trace,
            "send op={:?} len={} mask={}",
            opcode,
            payload.len(),
            hex::encode(mask)
        );

        if let Err(e) = self.transport.write_bytes(&self.out_buf) {
            // The next poll sees the dead transport and reports it.
            self.transport.close();
            return Err(e.into());
        }
        Ok(())
    }

    fn next_mask(&mut self) -> [u8; 4] {
        match self.config.mask_mode {
            MaskMode::Random => {
                let mut key = [0u8; 4];
                self.rng.fill_bytes(&mut key);
                key
            }
            MaskMode::Legacy => [0u8; 4],
        }
    }

    /// Reports a problem with one message. The connection stays up.
    fn report(&mut self, err: WsError) {
        diag!(self.config.log_level, Warn, "{err}");
        self.handlers.error(&err);
    }

    /// Ends the session after an unrecoverable stream error.
    fn fail_session(&mut self, err: WsError) {
        diag!(self.config.log_level, Warn, "session failed: {err}");
        self.transport.close();
        self.reset_session();
        self.handlers.error(&err);
    }

    fn connection_lost(&mut self) {
        let was_closing = self.state == ConnectionState::Closing;
        self.transport.close();
        self.reset_session();
        if was_closing {
            diag!(self.config.log_level, Info, "connection closed");
        } else {
            diag!(self.config.log_level, Warn, "connection lost");
            self.handlers.error(&WsError::ConnectionLost);
        }
    }

    fn reset_session(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.decoder.reset();
        self.reassembler.discard();
        self.negotiated_protocol = None;
    }
}

impl<T: Transport + std::fmt::Debug, R: RandomSource> std::fmt::Debug for WsClient<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("transport", &self.transport)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("active", &self.active)
            .field("reconnecting", &self.reconnecting)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}
