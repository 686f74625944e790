//! In-memory stream socket for deterministic control channel tests.
//!
//! [`MockStreamSocket`] implements [`StreamSocket`]. The test keeps the
//! paired [`MockStreamHandle`] to inject inbound bytes with arbitrary chunk
//! boundaries, simulate a peer close, inspect everything the client sent,
//! and optionally install a responder that answers each send.
//!
//! # Example
//!
//! ```
//! use netsdr_test_harness::MockStreamSocket;
//!
//! let (socket, handle) = MockStreamSocket::new();
//! // Echo every command back as its own ACK.
//! handle.echo_acks();
//! // Deliver an unsolicited frequency report split across two reads.
//! handle.push(&[0x0A, 0x20, 0x20, 0x00]);
//! handle.push(&[0x00, 0x90, 0xC6, 0xD5, 0x00, 0x00]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use netsdr_core::error::{Error, Result};
use netsdr_core::transport::StreamSocket;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

enum Inbound {
    Data(Vec<u8>),
    Eof,
}

#[derive(Default)]
struct Shared {
    sent: Vec<Vec<u8>>,
    responder: Option<Responder>,
    fail_sends: bool,
    stall_sends: bool,
    shutdown_called: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A [`StreamSocket`] fed from a [`MockStreamHandle`].
pub struct MockStreamSocket {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    /// Remainder of a chunk larger than the caller's buffer.
    pending: VecDeque<u8>,
    eof: bool,
    connected: bool,
    shared: Arc<Mutex<Shared>>,
}

/// Test-side control of a [`MockStreamSocket`].
#[derive(Clone)]
pub struct MockStreamHandle {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    shared: Arc<Mutex<Shared>>,
}

impl MockStreamSocket {
    /// Create a connected socket and its handle.
    pub fn new() -> (Self, MockStreamHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let socket = Self {
            inbound_tx: inbound_tx.clone(),
            inbound_rx,
            pending: VecDeque::new(),
            eof: false,
            connected: true,
            shared: shared.clone(),
        };
        let handle = MockStreamHandle { inbound_tx, shared };
        (socket, handle)
    }
}

impl MockStreamHandle {
    /// Queue bytes to be returned by the socket's next read.
    ///
    /// Each call is delivered as a separate read (split further only if the
    /// reader's buffer is smaller).
    pub fn push(&self, data: &[u8]) {
        let _ = self.inbound_tx.send(Inbound::Data(data.to_vec()));
    }

    /// Simulate the peer closing the connection. Reads return 0 afterwards.
    pub fn close(&self) {
        let _ = self.inbound_tx.send(Inbound::Eof);
    }

    /// Answer every send with the chunks `responder` returns.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        lock(&self.shared).responder = Some(Box::new(responder));
    }

    /// Echo every sent command back unchanged, as a receiver ACKs.
    pub fn echo_acks(&self) {
        self.set_responder(|sent| vec![sent.to_vec()]);
    }

    /// Make subsequent sends fail with [`Error::ConnectionLost`].
    pub fn fail_sends(&self, fail: bool) {
        lock(&self.shared).fail_sends = fail;
    }

    /// Make subsequent sends never complete, like a peer that stopped
    /// reading with a full send buffer.
    pub fn stall_sends(&self, stall: bool) {
        lock(&self.shared).stall_sends = stall;
    }

    /// Every buffer the client sent, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).sent.clone()
    }

    /// Whether the client called `shutdown()`.
    pub fn was_shut_down(&self) -> bool {
        lock(&self.shared).shutdown_called
    }
}

#[async_trait]
impl StreamSocket for MockStreamSocket {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let stalled = lock(&self.shared).stall_sends;
        if stalled {
            std::future::pending::<()>().await;
        }

        let replies = {
            let mut shared = lock(&self.shared);
            if shared.fail_sends {
                return Err(Error::ConnectionLost);
            }
            shared.sent.push(data.to_vec());
            match shared.responder.as_mut() {
                Some(responder) => responder(data),
                None => Vec::new(),
            }
        };

        for reply in replies {
            let _ = self.inbound_tx.send(Inbound::Data(reply));
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.pending.is_empty() {
            if self.eof {
                return Ok(0);
            }
            match self.inbound_rx.recv().await {
                Some(Inbound::Data(chunk)) => self.pending.extend(chunk),
                Some(Inbound::Eof) | None => {
                    self.eof = true;
                    return Ok(0);
                }
            }
        }

        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        lock(&self.shared).shutdown_called = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pushed_chunks_arrive_in_order() {
        let (mut socket, handle) = MockStreamSocket::new();
        handle.push(&[1, 2, 3]);
        handle.push(&[4]);

        let mut buf = [0u8; 16];
        let n = socket.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let n = socket.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[4]);
    }

    #[tokio::test]
    async fn partial_receive_keeps_remainder() {
        let (mut socket, handle) = MockStreamSocket::new();
        handle.push(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut buf = [0u8; 2];
        let n = socket.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
        let n = socket.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn responder_answers_sends() {
        let (mut socket, handle) = MockStreamSocket::new();
        handle.echo_acks();

        let cmd = [0x08, 0x00, 0x18, 0x00, 0x00, 0x02, 0x01, 0x0A];
        socket.send(&cmd).await.unwrap();

        let mut buf = [0u8; 16];
        let n = socket.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &cmd);
        assert_eq!(handle.sent(), vec![cmd.to_vec()]);
    }

    #[tokio::test]
    async fn close_yields_eof() {
        let (mut socket, handle) = MockStreamSocket::new();
        handle.push(&[1]);
        handle.close();

        let mut buf = [0u8; 4];
        assert_eq!(socket.receive(&mut buf).await.unwrap(), 1);
        assert_eq!(socket.receive(&mut buf).await.unwrap(), 0);
        assert_eq!(socket.receive(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn receive_waits_without_data() {
        let (mut socket, _handle) = MockStreamSocket::new();
        let mut buf = [0u8; 4];
        let receive = socket.receive(&mut buf);
        let result = tokio::time::timeout(Duration::from_millis(20), receive).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failed_sends_and_shutdown() {
        let (mut socket, handle) = MockStreamSocket::new();
        handle.fail_sends(true);
        assert!(matches!(socket.send(&[0x02, 0x00]).await, Err(Error::ConnectionLost)));
        assert!(handle.sent().is_empty());

        socket.shutdown().await.unwrap();
        assert!(handle.was_shut_down());
        assert!(!socket.is_connected());
        assert!(matches!(socket.send(&[0x02, 0x00]).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn stalled_send_never_completes() {
        let (mut socket, handle) = MockStreamSocket::new();
        handle.stall_sends(true);

        let send = socket.send(&[0x02, 0x00]);
        let result = tokio::time::timeout(Duration::from_millis(50), send).await;
        assert!(result.is_err());
        assert!(handle.sent().is_empty());
    }
}
