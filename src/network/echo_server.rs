//! UDP reflector used as the far end of [`super::udp_relay::UdpRelayTransport`].

use std::net::SocketAddr;

use log::{debug, error, info};
use tokio::net::UdpSocket;

use crate::error_handling::types::NetworkError;

const MAX_DATAGRAM: usize = 65_536;

pub struct EchoServer {
    socket: UdpSocket,
}

impl EchoServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            error!("[!] Could not bind echo server on {}: {}", addr, e);
            NetworkError::BindError(e)
        })?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket.local_addr().map_err(NetworkError::SockError)
    }

    /// Echoes every datagram back to its sender until a socket error occurs.
    pub async fn run(self) -> Result<(), NetworkError> {
        info!("Echo server listening on {}", self.local_addr()?);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, peer) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(NetworkError::SockError)?;
            debug!("Echoing {} bytes to {}", n, peer);
            if let Err(e) = self.socket.send_to(&buf[..n], peer).await {
                // one unreachable peer must not take the reflector down
                debug!("Echo to {} failed: {}", peer, e);
            }
        }
    }
}

pub async fn run_echo_server(bind: SocketAddr) -> Result<(), NetworkError> {
    EchoServer::bind(bind).await?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_datagrams() {
        let server = EchoServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();
        client.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        handle.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let err = EchoServer::bind(addr).await.err().unwrap();
        assert!(matches!(err, NetworkError::BindError(_)));
    }
}
