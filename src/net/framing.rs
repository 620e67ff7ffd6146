//! RFC 6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::collections::VecDeque;

use arrayvec::ArrayVec;

use crate::error::{WsError, WsResult};

/// Largest possible header: 2 + 8 (extended length) + 4 (mask key).
pub const MAX_HEADER_LEN: usize = 14;

/// Control frames carry at most this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

// Cap on the up-front payload allocation; larger frames grow as bytes arrive.
const PAYLOAD_PREALLOC: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(bits) => bits & 0x0F,
        }
    }

    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    /// Payload exactly as it arrived on the wire (still masked if the mask
    /// bit was set).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload with the mask removed. A no-op for unmasked frames.
    pub fn into_unmasked_payload(mut self) -> Vec<u8> {
        if let Some(key) = self.header.mask {
            apply_mask(&mut self.payload, key);
        }
        self.payload
    }
}

/// XORs `payload` with `key`, cycling the key by byte index. Masking and
/// unmasking are the same operation.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Number of header bytes implied by the first two header bytes.
fn header_len(second_byte: u8) -> usize {
    let ext = match second_byte & 0x7F {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let mask = if second_byte & 0x80 != 0 { 4 } else { 0 };
    2 + ext + mask
}

/// Decodes a complete header. `buf` must hold exactly `header_len(buf[1])`
/// bytes.
fn parse_header(buf: &[u8]) -> FrameHeader {
    let first_byte = buf[0];
    let second_byte = buf[1];

    let fin = first_byte & 0x80 != 0;
    let opcode = Opcode::from_bits(first_byte);
    let masked = second_byte & 0x80 != 0;

    let (payload_len, mut offset) = match second_byte & 0x7F {
        126 => (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4),
        127 => {
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(len_bytes), 10)
        }
        short => (u64::from(short), 2),
    };

    let mask = if masked {
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };
    debug_assert_eq!(offset, buf.len());

    FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
    }
}

/// Non-blocking byte source the decoder pulls from.
pub trait ByteSource {
    /// Bytes that can be read right now without blocking.
    fn available(&mut self) -> usize;

    /// Copies up to `buf.len()` ready bytes into `buf`. Returns 0 when
    /// nothing is ready.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

impl ByteSource for VecDeque<u8> {
    fn available(&mut self) -> usize {
        self.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.len());
        for (dst, src) in buf.iter_mut().zip(self.drain(..n)) {
            *dst = src;
        }
        n
    }
}

#[derive(Debug)]
enum DecodeState {
    Header,
    Payload { header: FrameHeader, remaining: usize },
}

/// Resumable frame decoder.
///
/// Each call to [`FrameDecoder::decode`] takes only the bytes the current
/// frame still needs and only as many as the source has ready, so a frame
/// split across many reads completes over several calls without blocking.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    header: ArrayVec<u8, MAX_HEADER_LEN>,
    payload: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            header: ArrayVec::new(),
            payload: Vec::new(),
        }
    }

    /// Bytes still required before the current step can advance.
    pub fn needed(&self) -> usize {
        match &self.state {
            DecodeState::Header if self.header.len() < 2 => 2 - self.header.len(),
            DecodeState::Header => header_len(self.header[1]) - self.header.len(),
            DecodeState::Payload { remaining, .. } => *remaining,
        }
    }

    /// True when a frame has been partly read.
    pub fn is_mid_frame(&self) -> bool {
        !self.header.is_empty() || matches!(self.state, DecodeState::Payload { .. })
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.state = DecodeState::Header;
        self.header.clear();
        self.payload = Vec::new();
    }

    /// Advances as far as `src` allows.
    ///
    /// Returns `Ok(Some(frame))` once a whole frame is in, `Ok(None)` when the
    /// source ran dry first. An error means the length field cannot be
    /// represented; the stream is unrecoverable after that.
    pub fn decode<S: ByteSource + ?Sized>(&mut self, src: &mut S) -> WsResult<Option<Frame>> {
        loop {
            match &mut self.state {
                DecodeState::Header => {
                    let need = self.needed();
                    if need > 0 {
                        if !self.fill_header(src, need) {
                            return Ok(None);
                        }
                        continue;
                    }

                    let header = parse_header(&self.header);
                    self.header.clear();
                    let len = usize::try_from(header.payload_len).map_err(|_| {
                        WsError::Unsupported(format!(
                            "payload length {} exceeds this platform's address space",
                            header.payload_len
                        ))
                    })?;
                    self.payload = Vec::with_capacity(len.min(PAYLOAD_PREALLOC));
                    self.state = DecodeState::Payload {
                        header,
                        remaining: len,
                    };
                }
                DecodeState::Payload { header, remaining } => {
                    if *remaining == 0 {
                        let frame = Frame {
                            header: *header,
                            payload: std::mem::take(&mut self.payload),
                        };
                        self.state = DecodeState::Header;
                        return Ok(Some(frame));
                    }

                    let ready = src.available().min(*remaining);
                    if ready == 0 {
                        return Ok(None);
                    }
                    let start = self.payload.len();
                    self.payload.resize(start + ready, 0);
                    let n = src.read(&mut self.payload[start..]);
                    self.payload.truncate(start + n);
                    *remaining -= n;
                    if n == 0 {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn fill_header<S: ByteSource + ?Sized>(&mut self, src: &mut S, need: usize) -> bool {
        let ready = src.available().min(need);
        if ready == 0 {
            return false;
        }
        let mut chunk = [0u8; MAX_HEADER_LEN];
        let n = src.read(&mut chunk[..ready]);
        self.header.extend(chunk[..n].iter().copied());
        n > 0
    }
}

/// Encodes one frame into `dst`.
///
/// With `mask = Some(key)` the mask bit is set, the key written after the
/// length and the payload XORed with it. Lengths above 65535 use the 64-bit
/// extension.
pub fn encode_frame(fin: bool, opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>, dst: &mut Vec<u8>) {
    let header = encode_header(fin, opcode, payload.len() as u64, mask);
    dst.reserve(header.len() + payload.len());
    dst.extend_from_slice(&header);

    let start = dst.len();
    dst.extend_from_slice(payload);
    if let Some(key) = mask {
        apply_mask(&mut dst[start..], key);
    }
}

/// Header bytes for a frame, without payload.
pub fn encode_header(fin: bool, opcode: Opcode, payload_len: u64, mask: Option<[u8; 4]>) -> ArrayVec<u8, MAX_HEADER_LEN> {
    let mut out = ArrayVec::new();

    // Byte 0: FIN | opcode
    let fin_bit = if fin { 0x80 } else { 0x00 };
    out.push(fin_bit | opcode.as_u8());

    // Byte 1: MASK | length, then the extension
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload_len <= 125 {
        out.push(mask_bit | payload_len as u8);
    } else if payload_len <= u64::from(u16::MAX) {
        out.push(mask_bit | 126);
        out.extend((payload_len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend(payload_len.to_be_bytes());
    }

    if let Some(key) = mask {
        out.extend(key);
    }
    out
}
