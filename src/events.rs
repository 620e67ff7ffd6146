//! Consumer callbacks. One handler per event kind; registering again
//! replaces the previous handler.

use crate::error::WsError;

pub type OpenHandler = Box<dyn FnMut()>;
pub type MessageHandler = Box<dyn FnMut(&str)>;
pub type BinaryHandler = Box<dyn FnMut(&[u8])>;
pub type CloseHandler = Box<dyn FnMut(u16, &str)>;
pub type ErrorHandler = Box<dyn FnMut(&WsError)>;
pub type ControlHandler = Box<dyn FnMut(&[u8])>;

#[derive(Default)]
pub struct Handlers {
    pub(crate) open: Option<OpenHandler>,
    pub(crate) message: Option<MessageHandler>,
    pub(crate) binary: Option<BinaryHandler>,
    pub(crate) close: Option<CloseHandler>,
    pub(crate) error: Option<ErrorHandler>,
    pub(crate) ping: Option<ControlHandler>,
    pub(crate) pong: Option<ControlHandler>,
}

impl Handlers {
    pub(crate) fn open(&mut self) {
        if let Some(f) = self.open.as_mut() {
            f();
        }
    }

    pub(crate) fn message(&mut self, text: &str) {
        if let Some(f) = self.message.as_mut() {
            f(text);
        }
    }

    pub(crate) fn binary(&mut self, data: &[u8]) {
        if let Some(f) = self.binary.as_mut() {
            f(data);
        }
    }

    pub(crate) fn close(&mut self, code: u16, reason: &str) {
        if let Some(f) = self.close.as_mut() {
            f(code, reason);
        }
    }

    pub(crate) fn error(&mut self, err: &WsError) {
        if let Some(f) = self.error.as_mut() {
            f(err);
        }
    }

    pub(crate) fn ping(&mut self, payload: &[u8]) {
        if let Some(f) = self.ping.as_mut() {
            f(payload);
        }
    }

    pub(crate) fn pong(&mut self, payload: &[u8]) {
        if let Some(f) = self.pong.as_mut() {
            f(payload);
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("open", &self.open.is_some())
            .field("message", &self.message.is_some())
            .field("binary", &self.binary.is_some())
            .field("close", &self.close.is_some())
            .field("error", &self.error.is_some())
            .field("ping", &self.ping.is_some())
            .field("pong", &self.pong.is_some())
            .finish()
    }
}
