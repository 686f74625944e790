//! Client lifecycle events.
//!
//! Emitted through a `tokio::sync::broadcast` channel by the client when
//! its connection or streaming state changes. Slow subscribers may miss
//! events; the current state can always be read from the client directly.

use std::net::SocketAddr;

/// An event emitted by the client when its lifecycle state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The control connection was established.
    Connected {
        /// Receiver control endpoint.
        addr: SocketAddr,
    },

    /// The control connection was closed by an explicit disconnect.
    Disconnected,

    /// The control connection ended without a disconnect request
    /// (peer closed, socket error, or desynchronized control stream).
    ConnectionLost,

    /// The receiver acknowledged a start command and the data socket is bound.
    StreamingStarted {
        /// Local address of the UDP data socket.
        local_addr: SocketAddr,
    },

    /// The data stream ended (stop command, disconnect, or data socket failure).
    StreamingStopped,
}
