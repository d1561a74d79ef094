// ABOUTME: Transport and signalling contracts a session drives
// ABOUTME: UdpTransport sends datagrams without awaiting on the player path

use crate::protocol::messages::SignalMessage;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

/// Datagram path to the remote voice endpoint
pub trait VoiceTransport: Send + Sync {
    /// Send one packet; must not block
    fn send(&self, packet: &[u8]) -> io::Result<usize>;

    /// Remote endpoint packets are sent to
    fn remote_addr(&self) -> SocketAddr;

    /// Release the underlying resources
    fn close(&self) {}
}

/// Signalling channel owned by the external handshake layer
pub trait Signaller: Send + Sync {
    /// Send a message to the remote peer
    fn send(&self, message: &SignalMessage) -> crate::Result<()>;

    /// Ask the handshake layer to establish the session again
    fn reconnect(&self) -> crate::Result<()>;

    /// Ask the handshake layer to leave the session
    fn disconnect(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// UDP transport backed by a Tokio socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind a local socket that sends to `remote`
    pub async fn bind(local: SocketAddr, remote: SocketAddr) -> crate::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        log::debug!(
            "UDP transport bound on {} -> {}",
            socket.local_addr()?,
            remote
        );
        Ok(Self {
            socket,
            remote,
            closed: AtomicBool::new(false),
        })
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl VoiceTransport for UdpTransport {
    fn send(&self, packet: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport closed",
            ));
        }
        self.socket.try_send_to(packet, self.remote)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("UDP transport to {} closed", self.remote);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_transport_sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = receiver.local_addr().unwrap();

        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), remote)
            .await
            .unwrap();
        assert_eq!(transport.remote_addr(), remote);

        transport.send(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        assert_eq!(from, transport.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_closed_transport_refuses() {
        let transport = UdpTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        transport.close();
        transport.close();
        let err = transport.send(&[0]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
