use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Creates a socket for an outbound connection to `addr`.
///
/// * `TCP_NODELAY`: frames are small and latency-sensitive, so Nagle is off.
/// * Keepalive: lets the OS notice a silently dead peer on an idle socket.
pub fn create_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    Ok(socket)
}

/// Connects with an upper bound on the wait, then switches the stream to
/// non-blocking mode for the `mio` event loop.
pub fn connect(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = create_socket(addr)?;
    socket.connect_timeout(&SockAddr::from(*addr), timeout)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
