//! In-memory datagram socket for data channel tests.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use netsdr_core::error::{Error, Result};
use netsdr_core::transport::DatagramSocket;

enum Inbound {
    Datagram(Vec<u8>),
    Error(String),
}

/// A [`DatagramSocket`] fed from a [`MockDatagramHandle`].
pub struct MockDatagramSocket {
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    local_addr: SocketAddr,
    closed: bool,
}

/// Test-side control of a [`MockDatagramSocket`].
#[derive(Clone)]
pub struct MockDatagramHandle {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl MockDatagramSocket {
    /// Create a socket reporting `local_addr` and its handle.
    pub fn new(local_addr: SocketAddr) -> (Self, MockDatagramHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let socket = Self {
            inbound_rx,
            local_addr,
            closed: false,
        };
        (socket, MockDatagramHandle { inbound_tx })
    }

    pub(crate) fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = local_addr;
        self
    }
}

impl MockDatagramHandle {
    /// Deliver one datagram.
    pub fn push(&self, datagram: &[u8]) {
        let _ = self.inbound_tx.send(Inbound::Datagram(datagram.to_vec()));
    }

    /// Make the next receive fail with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.inbound_tx.send(Inbound::Error(reason.to_string()));
    }
}

#[async_trait]
impl DatagramSocket for MockDatagramSocket {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        match self.inbound_rx.recv().await {
            Some(Inbound::Datagram(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            Some(Inbound::Error(reason)) => Err(Error::Transport(reason)),
            None => Err(Error::Transport("mock datagram handle dropped".into())),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        Ok(self.local_addr)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
