use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use super::broadcast::Outgoing;
use super::types::NetMessage;

/// Bincode-over-UDP transport.
///
/// Fair-loss point-to-point delivery; a send failure is logged and forgotten
/// because every protocol above retries on its own tick.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send(&self, out: &Outgoing) {
        match bincode::serialize(&out.msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, out.to).await {
                    tracing::warn!("Failed to send to {}: {}", out.to, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize message: {}", e),
        }
    }

    pub async fn send_all(&self, outs: &[Outgoing]) {
        for out in outs {
            self.send(out).await;
        }
    }

    /// Receive the next decodable message. Undecodable datagrams are logged
    /// and skipped, never surfaced as errors.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(SocketAddr, NetMessage)> {
        loop {
            let (len, src) = self.socket.recv_from(buf).await?;
            match bincode::deserialize::<NetMessage>(&buf[..len]) {
                Ok(msg) => return Ok((src, msg)),
                Err(e) => {
                    tracing::warn!("Failed to deserialize datagram from {}: {}", src, e);
                }
            }
        }
    }
}
