//! Loopback UDP binding to the heartbeat agent.

use crate::constants::LOOPBACK_IP;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, error};

/// Address of the heartbeat agent listening on `server_port`.
#[must_use]
pub fn destination(server_port: u16) -> SocketAddr {
    SocketAddr::from((LOOPBACK_IP, server_port))
}

/// Open a non-blocking UDP socket bound to loopback `client_port`.
///
/// The socket is closed again if any step fails. Must be called from within
/// a tokio runtime.
///
/// # Errors
///
/// Returns [`Error::Socket`] or [`Error::Bind`] for the failing step.
pub fn bind(client_port: u16) -> Result<UdpSocket> {
    let addr = SocketAddr::from((LOOPBACK_IP, client_port));

    if tokio::runtime::Handle::try_current().is_err() {
        return Err(Error::Socket(io::Error::other("no tokio runtime")));
    }

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| {
        error!("Failed to create sock. Error {e}");
        Error::Socket(e)
    })?;

    socket.set_nonblocking(true).map_err(|e| {
        error!("Failed to set flags, error={e}.");
        Error::Socket(e)
    })?;

    socket.bind(&SockAddr::from(addr)).map_err(|source| {
        error!("Failed to bind. error={source}");
        Error::Bind { addr, source }
    })?;

    let socket = UdpSocket::from_std(socket.into()).map_err(Error::Socket)?;
    debug!("Cluster hbs socket bound to {addr}");
    Ok(socket)
}

/// Send `payload` as one datagram without waiting for writability.
///
/// # Errors
///
/// Returns the raw I/O error, including `WouldBlock` if the send buffer is full.
pub fn send_datagram(socket: &UdpSocket, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
    SockRef::from(socket).send_to(payload, &SockAddr::from(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_is_loopback() {
        let addr = destination(2106);
        assert_eq!(addr.to_string(), "127.0.0.1:2106");
    }

    #[test]
    fn test_bind_requires_runtime() {
        assert!(matches!(bind(0), Err(Error::Socket(_))));
    }

    #[tokio::test]
    async fn test_bind_and_send() {
        let agent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = bind(0).unwrap();
        assert!(socket.local_addr().unwrap().ip().is_loopback());

        let sent = send_datagram(&socket, b"hello", agent.local_addr().unwrap()).unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 8];
        let (len, from) = agent.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, socket.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_bind_port_in_use() {
        let first = bind(0).unwrap();
        let port = first.local_addr().unwrap().port();
        assert!(matches!(bind(port), Err(Error::Bind { .. })));
    }
}
