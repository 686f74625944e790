//! Socket traits for NetSDR communication.
//!
//! The client never touches a concrete socket type. It opens sockets through
//! a [`SocketFactory`] and talks to a byte-stream [`StreamSocket`] (the TCP
//! control channel) and a [`DatagramSocket`] (the UDP data channel).
//!
//! `netsdr-transport` provides tokio-backed implementations; the
//! `netsdr-test-harness` crate provides in-memory doubles for deterministic
//! tests.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous bidirectional byte stream to the receiver.
///
/// Reads return whatever the network delivered: a message may span several
/// reads and one read may carry several messages. Framing is the caller's job.
#[async_trait]
pub trait StreamSocket: Send + Sync {
    /// Write all of `data` to the stream.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read available bytes into `buf`.
    ///
    /// Returns `Ok(0)` at end of stream. Must be cancel-safe: dropping the
    /// future before it completes loses no data.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Shut down both directions and close the socket.
    ///
    /// Closing an already closed socket is a no-op.
    async fn shutdown(&mut self) -> Result<()>;

    /// Whether the socket is still open.
    fn is_connected(&self) -> bool;
}

/// Asynchronous datagram socket bound to a local address.
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    /// Receive one datagram into `buf`, returning its length.
    ///
    /// Bytes beyond `buf.len()` are discarded. Must be cancel-safe.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// The local address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the socket. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Opens the sockets the client needs.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Connect a stream socket to `addr`.
    async fn connect_stream(&self, addr: SocketAddr) -> Result<Box<dyn StreamSocket>>;

    /// Bind a datagram socket to the local address `addr`.
    async fn bind_datagram(&self, addr: SocketAddr) -> Result<Box<dyn DatagramSocket>>;
}
