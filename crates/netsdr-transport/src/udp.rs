//! UDP data channel transport.
//!
//! The receiver pushes IQ data item packets as UDP datagrams to the host.
//! [`UdpTransport`] binds the local end and implements [`DatagramSocket`].

use std::net::SocketAddr;

use async_trait::async_trait;
use netsdr_core::error::{Error, Result};
use netsdr_core::transport::DatagramSocket;
use tokio::net::UdpSocket;

/// Bound UDP socket receiving IQ data packets.
#[derive(Debug)]
pub struct UdpTransport {
    /// `None` after `close()`.
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address. Port 0 lets the OS pick.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self {
            socket: Some(socket),
            local_addr,
        })
    }
}

#[async_trait]
impl DatagramSocket for UdpTransport {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        match socket.recv_from(buf).await {
            Ok((n, src)) => {
                tracing::trace!(
                    local = %self.local_addr,
                    remote = %src,
                    bytes = n,
                    "Received datagram"
                );
                Ok(n)
            }
            Err(e) => {
                tracing::error!(local = %self.local_addr, error = %e, "Failed to receive datagram");
                Err(Error::Io(e))
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        if self.socket.is_none() {
            return Err(Error::NotConnected);
        }
        Ok(self.local_addr)
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            tracing::debug!(local = %self.local_addr, "UDP socket closed");
        }
        Ok(())
    }
}
