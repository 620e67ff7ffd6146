//! Byte-stream transport the engine runs over.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, ToSocketAddrs};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::diag::TARGET;
use crate::net::framing::ByteSource;
use crate::net::tcp_opt;

const READ_CHUNK: usize = 4096;

/// Connection-oriented byte stream.
///
/// Reads never block: [`ByteSource::available`] reports what is ready and
/// [`ByteSource::read`] returns 0 when nothing is. Writes may be buffered;
/// [`Transport::flush`] pushes out whatever the peer will take.
pub trait Transport: ByteSource {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Tears the connection down. Safe to call when already closed.
    fn close(&mut self);

    /// True while the peer is connected or unread bytes remain.
    fn is_connected(&self) -> bool;

    fn read_byte(&mut self) -> Option<u8> {
        let mut b = [0u8; 1];
        match self.read(&mut b) {
            1 => Some(b[0]),
            _ => None,
        }
    }
}

/// Non-blocking TCP transport on `mio`.
///
/// When built with [`TcpTransport::with_registry`], every new stream is
/// registered for readability under the given token so the host loop can
/// sleep in `Poll::poll` between ticks.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    registration: Option<(Registry, Token)>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            stream: None,
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            registration: None,
            connect_timeout,
        }
    }

    pub fn with_registry(registry: &Registry, token: Token, connect_timeout: Duration) -> io::Result<Self> {
        let mut transport = Self::new(connect_timeout);
        transport.registration = Some((registry.try_clone()?, token));
        Ok(transport)
    }

    /// Received bytes not yet handed to the decoder.
    pub fn has_buffered(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Bytes written but not yet accepted by the socket.
    pub fn pending_writes(&self) -> usize {
        self.outbound.len()
    }

    /// Drains everything the socket has ready into the inbound buffer.
    fn fill_inbound(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    log::debug!(target: TARGET, "peer closed the TCP stream");
                    self.drop_stream();
                    return;
                }
                Ok(n) => self.inbound.extend(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!(target: TARGET, "TCP read error: {e}");
                    self.drop_stream();
                    return;
                }
            }
        }
    }

    fn drop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Some((registry, _)) = &self.registration {
                let _ = registry.deregister(&mut stream);
            }
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.outbound.clear();
    }
}

impl ByteSource for TcpTransport {
    fn available(&mut self) -> usize {
        self.fill_inbound();
        self.inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.inbound.len() < buf.len() {
            self.fill_inbound();
        }
        ByteSource::read(&mut self.inbound, buf)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        self.close();

        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match tcp_opt::connect(&addr, self.connect_timeout) {
                Ok(std_stream) => {
                    let mut stream = TcpStream::from_std(std_stream);
                    if let Some((registry, token)) = &self.registration {
                        registry.register(&mut stream, *token, Interest::READABLE)?;
                    }
                    log::debug!(target: TARGET, "TCP connected to {addr}");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    log::debug!(target: TARGET, "TCP connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("{host} resolved to no addresses"))
        }))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(io::Error::from(ErrorKind::NotConnected));
        }
        self.outbound.extend_from_slice(bytes);
        self.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.drop_stream();
        self.inbound.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some() || !self.inbound.is_empty()
    }
}
