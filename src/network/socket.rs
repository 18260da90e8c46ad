//! Socket construction shared by the listening channels

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Bind a UDP socket with address reuse, a sized receive buffer and a read
/// timeout
pub fn create_udp_socket(
    addr: SocketAddr,
    recv_buffer_size: usize,
    read_timeout: Duration,
) -> Result<UdpSocket, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size.max(4096) * 16) {
        tracing::debug!("Could not size UDP receive buffer: {}", e);
    }
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_read_timeout(Some(read_timeout)).map_err(bind_err)?;

    Ok(socket.into())
}

/// Bind a TCP listener with address reuse and a backlog of one
///
/// The listener is non-blocking so the accept loop can poll for shutdown.
pub fn create_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// Timeout-style errors that only mean "nothing yet"
pub fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}
