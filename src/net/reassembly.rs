//! Fragment reassembly.
//!
//! Data frames accumulate until a frame with `fin` set. A text or binary
//! frame arriving while a message is open joins it, and if it is final its
//! own opcode names the result. Control frames pass straight through and
//! never touch an in-progress message.

use crate::error::ProtocolViolation;
use crate::net::framing::{Frame, FrameHeader, Opcode, MAX_CONTROL_PAYLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Close,
    Ping,
    Pong,
}

/// What one frame contributed.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// A complete data message. `kind` is the first fragment's unless the
    /// final frame carried its own.
    Message { kind: DataKind, payload: Vec<u8> },
    Control { kind: ControlKind, payload: Vec<u8> },
    /// Fragment stored; the message is not complete yet.
    Pending,
}

#[derive(Debug)]
struct Partial {
    kind: DataKind,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a fragmented message is open.
    pub fn is_pending(&self) -> bool {
        self.partial.is_some()
    }

    /// Bytes accumulated for the open message.
    pub fn pending_len(&self) -> usize {
        self.partial.as_ref().map_or(0, |p| p.payload.len())
    }

    pub fn discard(&mut self) {
        self.partial = None;
    }

    /// Feeds one unmasked frame. On error the open message, if any, is gone.
    pub fn push(&mut self, frame: Frame) -> Result<Assembled, ProtocolViolation> {
        let header = frame.header;
        let fin = header.fin;
        let payload = frame.payload;

        let kind = match header.opcode {
            Opcode::Reserved(bits) => {
                self.discard();
                return Err(ProtocolViolation::ReservedOpcode(bits));
            }
            Opcode::Close => return self.control(ControlKind::Close, &header, payload),
            Opcode::Ping => return self.control(ControlKind::Ping, &header, payload),
            Opcode::Pong => return self.control(ControlKind::Pong, &header, payload),
            Opcode::Text => Some(DataKind::Text),
            Opcode::Binary => Some(DataKind::Binary),
            Opcode::Continuation => None,
        };

        let Some(mut partial) = self.partial.take() else {
            return match kind {
                None => Err(ProtocolViolation::UnexpectedContinuation),
                Some(kind) if fin => Ok(Assembled::Message { kind, payload }),
                Some(kind) => {
                    self.partial = Some(Partial { kind, payload });
                    Ok(Assembled::Pending)
                }
            };
        };

        partial.payload.extend_from_slice(&payload);
        if !fin {
            self.partial = Some(partial);
            return Ok(Assembled::Pending);
        }
        Ok(Assembled::Message {
            kind: kind.unwrap_or(partial.kind),
            payload: partial.payload,
        })
    }

    fn control(
        &mut self,
        kind: ControlKind,
        header: &FrameHeader,
        payload: Vec<u8>,
    ) -> Result<Assembled, ProtocolViolation> {
        if !header.fin {
            self.discard();
            return Err(ProtocolViolation::FragmentedControl);
        }
        if header.payload_len > MAX_CONTROL_PAYLOAD {
            self.discard();
            return Err(ProtocolViolation::ControlTooLong(header.payload_len));
        }
        Ok(Assembled::Control { kind, payload })
    }
}
