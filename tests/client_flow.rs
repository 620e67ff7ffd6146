use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use tick_ws::net::framing::{ByteSource, FrameDecoder};
use tick_ws::testing::{MockHandle, MockTransport, SequenceRandom};
use tick_ws::{ClientConfig, ConnectionState, MaskMode, Opcode, WsClient};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Open,
    Text(String),
    Binary(Vec<u8>),
    Close(u16, String),
    Error(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

type Client = WsClient<MockTransport, SequenceRandom>;

struct Harness {
    ws: Client,
    mock: MockHandle,
    events: Rc<RefCell<Vec<Event>>>,
}

impl Harness {
    fn new(config: ClientConfig) -> Self {
        let transport = MockTransport::new();
        let mock = transport.handle();
        let mut ws = WsClient::with_random(transport, SequenceRandom::new(1), config);
        let events = Rc::new(RefCell::new(Vec::new()));

        let ev = Rc::clone(&events);
        ws.on_open(move || ev.borrow_mut().push(Event::Open));
        let ev = Rc::clone(&events);
        ws.on_message(move |t| ev.borrow_mut().push(Event::Text(t.to_string())));
        let ev = Rc::clone(&events);
        ws.on_binary_message(move |b| ev.borrow_mut().push(Event::Binary(b.to_vec())));
        let ev = Rc::clone(&events);
        ws.on_close(move |c, r| ev.borrow_mut().push(Event::Close(c, r.to_string())));
        let ev = Rc::clone(&events);
        ws.on_error(move |e| ev.borrow_mut().push(Event::Error(e.to_string())));
        let ev = Rc::clone(&events);
        ws.on_ping(move |p| ev.borrow_mut().push(Event::Ping(p.to_vec())));
        let ev = Rc::clone(&events);
        ws.on_pong(move |p| ev.borrow_mut().push(Event::Pong(p.to_vec())));

        Self { ws, mock, events }
    }

    fn fast(mode: MaskMode) -> Self {
        Self::new(fast_config(mode))
    }

    /// Connects, completes the handshake and clears the recorded traffic.
    fn opened(mode: MaskMode) -> Self {
        let mut h = Self::fast(mode);
        h.mock.accept_next_handshake();
        h.ws.connect("example.com", 80, Some("chat"), "/ws");
        h.ws.poll();
        assert_eq!(h.take_events(), vec![Event::Open]);
        h.mock.take_written();
        h
    }

    fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn poll_n(&mut self, n: usize) {
        for _ in 0..n {
            self.ws.poll();
        }
    }
}

fn fast_config(mode: MaskMode) -> ClientConfig {
    ClientConfig {
        retry_interval: Duration::ZERO,
        handshake_attempts: 3,
        handshake_poll_delay: Duration::ZERO,
        mask_mode: mode,
        ..ClientConfig::default()
    }
}

fn decode_written(bytes: &[u8]) -> Vec<(Opcode, bool, Vec<u8>)> {
    let mut src: std::collections::VecDeque<u8> = bytes.iter().copied().collect();
    let mut decoder = FrameDecoder::new();
    let mut out = Vec::new();
    while src.available() > 0 {
        let frame = decoder.decode(&mut src).unwrap().expect("truncated frame");
        let masked = frame.header.is_masked();
        let opcode = frame.header.opcode;
        out.push((opcode, masked, frame.into_unmasked_payload()));
    }
    out
}

#[test]
fn connect_does_no_io_until_polled() {
    let mut h = Harness::fast(MaskMode::Random);
    h.mock.accept_next_handshake();
    h.ws.connect("example.com", 80, None, "/");
    assert_eq!(h.mock.connects(), 0);
    assert!(h.ws.is_active());

    h.ws.poll();
    assert_eq!(h.mock.connects(), 1);
    assert_eq!(h.mock.last_endpoint(), Some(("example.com".to_string(), 80)));
    assert_eq!(h.ws.state(), ConnectionState::Open);
    assert_eq!(h.take_events(), vec![Event::Open]);
}

#[test]
fn handshake_request_carries_endpoint_and_key() {
    let mut h = Harness::fast(MaskMode::Random);
    h.mock.accept_next_handshake();
    h.ws.connect("example.com", 80, Some("chat"), "/ws");
    h.ws.poll();

    let request = h.mock.written_text();
    let lines: Vec<&str> = request.split("\r\n").collect();
    assert_eq!(lines[0], "GET /ws HTTP/1.1");
    assert!(lines.contains(&"Host: example.com"));
    assert!(lines.contains(&"Sec-WebSocket-Protocol: chat"));
    assert!(lines.contains(&"Sec-WebSocket-Version: 13"));
    assert!(request.ends_with("\r\n\r\n"));

    let key = lines
        .iter()
        .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
        .expect("key line");
    assert_eq!(STANDARD.decode(key).unwrap().len(), 16);
}

#[test]
fn negotiated_protocol_is_recorded() {
    let mut h = Harness::fast(MaskMode::Random);
    h.mock.on_next_connect(
        b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Protocol: chat\r\n\r\n",
    );
    h.ws.connect("example.com", 80, Some("chat"), "/");
    h.ws.poll();
    assert_eq!(h.ws.negotiated_protocol(), Some("chat"));

    h.ws.disconnect();
    assert_eq!(h.ws.negotiated_protocol(), None);
}

#[test]
fn rejected_handshake_closes_transport_and_reports() {
    let mut h = Harness::fast(MaskMode::Random);
    h.mock.on_next_connect(b"HTTP/1.1 403 Forbidden\r\n\r\n");
    h.ws.connect("example.com", 80, None, "/");
    h.ws.poll();

    assert_eq!(h.ws.state(), ConnectionState::Disconnected);
    assert!(!h.ws.is_connected());
    assert!(!h.mock.is_open());
    assert_eq!(h.mock.closes(), 1);
    let events = h.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Error(msg) if msg.contains("403")));
}

#[test]
fn silent_server_times_out_the_handshake() {
    let mut h = Harness::fast(MaskMode::Random);
    h.ws.connect("example.com", 80, None, "/");
    h.ws.poll();

    assert_eq!(h.ws.state(), ConnectionState::Disconnected);
    assert!(!h.mock.is_open());
    let events = h.take_events();
    assert!(matches!(&events[..], [Event::Error(msg)] if msg.contains("no response")));
}

#[test]
fn failed_connect_retries_on_next_eligible_poll() {
    let mut h = Harness::fast(MaskMode::Random);
    h.mock.fail_next_connect();
    h.mock.accept_next_handshake();
    h.ws.connect("example.com", 80, None, "/");

    h.ws.poll();
    assert_eq!(h.ws.state(), ConnectionState::Disconnected);
    assert!(matches!(&h.take_events()[..], [Event::Error(msg)] if msg.contains("example.com:80")));

    h.ws.poll();
    assert_eq!(h.mock.connects(), 2);
    assert_eq!(h.ws.state(), ConnectionState::Open);
    assert_eq!(h.take_events(), vec![Event::Open]);
}

#[test]
fn retry_waits_for_the_interval() {
    let mut h = Harness::new(ClientConfig {
        retry_interval: Duration::from_secs(60),
        ..fast_config(MaskMode::Random)
    });
    h.mock.fail_next_connect();
    h.ws.connect("example.com", 80, None, "/");

    h.poll_n(5);
    assert_eq!(h.mock.connects(), 1);

    // A fresh connect makes the client eligible again straight away.
    h.mock.accept_next_handshake();
    h.ws.connect("example.com", 80, None, "/");
    h.ws.poll();
    assert_eq!(h.mock.connects(), 2);
    assert_eq!(h.ws.state(), ConnectionState::Open);
}

#[test]
fn fragmented_text_is_delivered_once() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(false, Opcode::Text, b"abc");
    h.mock.push_frame(true, Opcode::Continuation, b"def");

    h.ws.poll();
    assert!(h.take_events().is_empty());
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Text("abcdef".into())]);
}

#[test]
fn final_text_frame_joins_open_fragment() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(false, Opcode::Text, b"abc");
    h.mock.push_frame(true, Opcode::Text, b"def");

    h.poll_n(3);
    assert_eq!(h.take_events(), vec![Event::Text("abcdef".into())]);
}

#[test]
fn one_frame_per_poll() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Text, b"one");
    h.mock.push_frame(true, Opcode::Text, b"two");

    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Text("one".into())]);
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Text("two".into())]);
}

#[test]
fn partial_frame_completes_on_a_later_poll() {
    let mut h = Harness::opened(MaskMode::Random);
    let mut wire = vec![0x82, 126, 0x01, 0x00];
    wire.extend(std::iter::repeat(9u8).take(256));

    h.mock.push_inbound(&wire[..3]);
    h.poll_n(3);
    h.mock.push_inbound(&wire[3..100]);
    h.poll_n(3);
    assert!(h.take_events().is_empty());
    assert_eq!(h.ws.state(), ConnectionState::Open);

    h.mock.push_inbound(&wire[100..]);
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Binary(vec![9u8; 256])]);
}

#[test]
fn binary_message_is_delivered_as_bytes() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Binary, &[0, 159, 146, 150]);
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Binary(vec![0, 159, 146, 150])]);
}

#[test]
fn legacy_ping_reply_is_bare_unmasked_pong() {
    let mut h = Harness::opened(MaskMode::Legacy);
    h.mock.push_inbound(&[0x89, 0x00]);
    h.ws.poll();

    assert_eq!(h.mock.written(), [0x8A, 0x00]);
    assert_eq!(h.take_events(), vec![Event::Ping(vec![])]);
}

#[test]
fn random_mode_pong_is_masked_and_echoes_payload() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Ping, b"hb");
    h.ws.poll();

    let frames = decode_written(&h.mock.written());
    assert_eq!(frames, vec![(Opcode::Pong, true, b"hb".to_vec())]);
    assert_eq!(h.take_events(), vec![Event::Ping(b"hb".to_vec())]);
}

#[test]
fn pong_only_fires_the_hook() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Pong, b"x");
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Pong(b"x".to_vec())]);
    assert!(h.mock.written().is_empty());
}

#[test]
fn server_close_reports_code_and_reason() {
    let mut h = Harness::opened(MaskMode::Legacy);
    h.mock.push_inbound(&[0x88, 0x05, 0x03, 0xE8, b'b', b'y', b'e']);
    h.ws.poll();

    assert_eq!(h.take_events(), vec![Event::Close(1000, "bye".into())]);
    assert!(!h.ws.is_connected());
    assert_eq!(h.ws.state(), ConnectionState::Disconnected);
    assert!(h.mock.written().is_empty(), "legacy mode does not answer the close");
}

#[test]
fn server_close_is_answered_in_random_mode() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Close, &[0x03, 0xE9]);
    h.ws.poll();

    let frames = decode_written(&h.mock.written());
    assert_eq!(frames, vec![(Opcode::Close, true, vec![0x03, 0xE9])]);
    assert_eq!(h.take_events(), vec![Event::Close(1001, String::new())]);
    assert!(!h.ws.is_connected());
}

#[test]
fn close_without_status_uses_1005() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Close, b"");
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Close(1005, String::new())]);
}

#[test]
fn client_close_waits_for_server_close() {
    let mut h = Harness::opened(MaskMode::Random);
    h.ws.close(1000, "done").unwrap();
    assert_eq!(h.ws.state(), ConnectionState::Closing);
    assert!(h.ws.send("late").is_err());

    let frames = decode_written(&h.mock.take_written());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, Opcode::Close);
    assert_eq!(frames[0].2, b"\x03\xE8done");

    h.mock.push_frame(true, Opcode::Close, &[0x03, 0xE8]);
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Close(1000, String::new())]);
    assert_eq!(h.ws.state(), ConnectionState::Disconnected);
    assert!(h.mock.written().is_empty(), "no second close frame");
}

#[test]
fn masked_server_frame_is_rejected_but_connection_stays() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(false, Opcode::Text, b"abc");
    h.ws.poll();
    // Masked "Hello" from RFC 6455 section 5.7.
    h.mock.push_inbound(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    h.ws.poll();

    let events = h.take_events();
    assert!(matches!(&events[..], [Event::Error(msg)] if msg.contains("masked")));
    assert_eq!(h.ws.state(), ConnectionState::Open);

    // The half-built "abc" message is gone.
    h.mock.push_frame(true, Opcode::Continuation, b"def");
    h.ws.poll();
    assert!(matches!(&h.take_events()[..], [Event::Error(msg)] if msg.contains("continuation")));

    h.mock.push_frame(true, Opcode::Text, b"ok");
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Text("ok".into())]);
}

#[test]
fn reserved_opcode_and_bad_utf8_are_reported() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_inbound(&[0x83, 0x00]);
    h.mock.push_frame(true, Opcode::Text, &[0xff, 0xfe]);
    h.poll_n(2);

    let events = h.take_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Event::Error(msg) if msg.contains("0x3")));
    assert!(matches!(&events[1], Event::Error(msg) if msg.contains("UTF-8")));
    assert_eq!(h.ws.state(), ConnectionState::Open);
}

#[test]
fn send_encodes_masked_frames_of_every_length_class() {
    let mut h = Harness::opened(MaskMode::Random);
    let long = "x".repeat(70_000);
    h.ws.send("hi").unwrap();
    h.ws.send(&"y".repeat(300)).unwrap();
    h.ws.send(&long).unwrap();
    h.ws.send_binary(&[1, 2, 3]).unwrap();

    let frames = decode_written(&h.mock.written());
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0], (Opcode::Text, true, b"hi".to_vec()));
    assert_eq!(frames[1].2.len(), 300);
    assert_eq!(frames[2], (Opcode::Text, true, long.into_bytes()));
    assert_eq!(frames[3], (Opcode::Binary, true, vec![1, 2, 3]));
}

#[test]
fn send_is_refused_when_not_usable() {
    let mut h = Harness::fast(MaskMode::Random);
    assert!(h.ws.send("x").is_err(), "inactive");
    assert!(h.ws.send_binary(&[1]).is_err(), "inactive");

    h.mock.fail_next_connect();
    h.ws.connect("example.com", 80, None, "/");
    h.ws.poll();
    assert!(h.ws.send("x").is_err(), "not open");
    assert_eq!(h.mock.written(), Vec::<u8>::new());
}

#[test]
fn disconnect_twice_is_harmless_and_keeps_reconnecting() {
    let mut h = Harness::opened(MaskMode::Random);
    h.ws.disconnect();
    h.ws.disconnect();
    assert_eq!(h.ws.state(), ConnectionState::Disconnected);
    assert!(!h.ws.is_connected());
    assert!(h.take_events().is_empty());

    // Still armed: the next poll reconnects.
    h.mock.accept_next_handshake();
    h.ws.poll();
    assert_eq!(h.ws.state(), ConnectionState::Open);
    assert_eq!(h.take_events(), vec![Event::Open]);
}

#[test]
fn shutdown_stops_reconnecting() {
    let mut h = Harness::opened(MaskMode::Random);
    h.ws.shutdown();
    h.poll_n(3);
    assert_eq!(h.mock.connects(), 1);
    assert!(!h.ws.is_active());
    assert!(h.ws.send("x").is_err());
}

#[test]
fn dropped_peer_is_reported_then_retried() {
    let mut h = Harness::opened(MaskMode::Random);
    h.mock.push_frame(true, Opcode::Text, b"last");
    h.mock.drop_peer();

    // Buffered data is still delivered before the loss is noticed.
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Text("last".into())]);

    h.ws.poll();
    assert!(matches!(&h.take_events()[..], [Event::Error(msg)] if msg.contains("lost")));
    assert_eq!(h.ws.state(), ConnectionState::Disconnected);

    h.mock.accept_next_handshake();
    h.ws.poll();
    assert_eq!(h.take_events(), vec![Event::Open]);
}

#[test]
fn accept_check_is_opt_in() {
    // Canned response carries no Sec-WebSocket-Accept at all.
    let mut lax = Harness::fast(MaskMode::Random);
    lax.mock.accept_next_handshake();
    lax.ws.connect("example.com", 80, None, "/");
    lax.ws.poll();
    assert_eq!(lax.ws.state(), ConnectionState::Open);

    let mut strict = Harness::new(ClientConfig {
        verify_accept: true,
        ..fast_config(MaskMode::Random)
    });
    strict.mock.accept_next_handshake();
    strict.ws.connect("example.com", 80, None, "/");
    strict.ws.poll();
    assert_eq!(strict.ws.state(), ConnectionState::Disconnected);
    assert!(matches!(&strict.take_events()[..], [Event::Error(msg)] if msg.contains("Accept")));
}

#[test]
fn handlers_are_replaced_not_stacked() {
    let mut h = Harness::opened(MaskMode::Random);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    h.ws.on_message(move |t| s.borrow_mut().push(t.to_string()));

    h.mock.push_frame(true, Opcode::Text, b"hello");
    h.ws.poll();
    assert_eq!(*seen.borrow(), vec!["hello".to_string()]);
    assert!(h.take_events().is_empty(), "old handler no longer fires");
}
