//! Socket factory handing out pre-created mock sockets.
//!
//! # Example
//!
//! ```
//! use netsdr_test_harness::MockSocketFactory;
//!
//! let factory = MockSocketFactory::new();
//! let control = factory.add_stream();
//! control.echo_acks();
//! let data = factory.add_datagram();
//! // Hand `factory.clone()` to the client builder, keep the handles.
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use netsdr_core::error::{Error, Result};
use netsdr_core::transport::{DatagramSocket, SocketFactory, StreamSocket};

use crate::mock_datagram::{MockDatagramHandle, MockDatagramSocket};
use crate::mock_stream::{MockStreamHandle, MockStreamSocket};

#[derive(Default)]
struct FactoryState {
    streams: VecDeque<MockStreamSocket>,
    datagrams: VecDeque<MockDatagramSocket>,
    connects: Vec<SocketAddr>,
    binds: Vec<SocketAddr>,
}

/// A [`SocketFactory`] that returns queued mock sockets in order.
///
/// A connect or bind with nothing queued fails with a transport error, the
/// same way an unreachable receiver would. Clones share state.
#[derive(Clone, Default)]
pub struct MockSocketFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a stream socket for the next `connect_stream`.
    pub fn add_stream(&self) -> MockStreamHandle {
        let (socket, handle) = MockStreamSocket::new();
        self.lock().streams.push_back(socket);
        handle
    }

    /// Queue a datagram socket for the next `bind_datagram`.
    ///
    /// The socket reports the address it was bound with as its local address.
    pub fn add_datagram(&self) -> MockDatagramHandle {
        let placeholder: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
        let (socket, handle) = MockDatagramSocket::new(placeholder);
        self.lock().datagrams.push_back(socket);
        handle
    }

    /// Addresses passed to `connect_stream`, in call order.
    pub fn connects(&self) -> Vec<SocketAddr> {
        self.lock().connects.clone()
    }

    /// Addresses passed to `bind_datagram`, in call order.
    pub fn binds(&self) -> Vec<SocketAddr> {
        self.lock().binds.clone()
    }
}

#[async_trait]
impl SocketFactory for MockSocketFactory {
    async fn connect_stream(&self, addr: SocketAddr) -> Result<Box<dyn StreamSocket>> {
        let mut state = self.lock();
        state.connects.push(addr);
        match state.streams.pop_front() {
            Some(socket) => Ok(Box::new(socket)),
            None => Err(Error::Transport(format!("connection refused: {}", addr))),
        }
    }

    async fn bind_datagram(&self, addr: SocketAddr) -> Result<Box<dyn DatagramSocket>> {
        let mut state = self.lock();
        state.binds.push(addr);
        match state.datagrams.pop_front() {
            Some(socket) => Ok(Box::new(socket.with_local_addr(addr))),
            None => Err(Error::Transport(format!("address in use: {}", addr))),
        }
    }
}
