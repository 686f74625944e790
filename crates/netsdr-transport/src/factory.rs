//! Socket factory backed by real tokio sockets.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use netsdr_core::error::Result;
use netsdr_core::transport::{DatagramSocket, SocketFactory, StreamSocket};

use crate::tcp::{DEFAULT_CONNECT_TIMEOUT, TcpTransport};
use crate::udp::UdpTransport;

/// Opens [`TcpTransport`] control connections and [`UdpTransport`] data sockets.
#[derive(Debug, Clone)]
pub struct NetworkSocketFactory {
    connect_timeout: Duration,
}

impl NetworkSocketFactory {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for NetworkSocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocketFactory for NetworkSocketFactory {
    async fn connect_stream(&self, addr: SocketAddr) -> Result<Box<dyn StreamSocket>> {
        let transport = TcpTransport::connect_with_timeout(addr, self.connect_timeout).await?;
        Ok(Box::new(transport))
    }

    async fn bind_datagram(&self, addr: SocketAddr) -> Result<Box<dyn DatagramSocket>> {
        let transport = UdpTransport::bind(addr).await?;
        Ok(Box::new(transport))
    }
}
