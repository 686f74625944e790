//! Error types for the NetSDR client.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Wire-format, correlation, device, and
//! transport failures are all captured here.

/// The error type for all NetSDR operations.
///
/// Variants follow the failure modes of the protocol: malformed messages,
/// unanswered or rejected commands, commands issued without a connection,
/// and socket failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed header or message body (bad marker, unknown data mode,
    /// length mismatch).
    ///
    /// Local to the message being parsed; it never tears down a connection
    /// by itself.
    #[error("format error: {0}")]
    Format(String),

    /// Timed out waiting for the receiver to answer a command.
    #[error("timeout waiting for response")]
    Timeout,

    /// The receiver answered a command with a NAK (bare 2-byte header).
    ///
    /// The connection stays usable.
    #[error("device rejected command: {0}")]
    DeviceRejected(String),

    /// A command was issued while the client is not connected.
    #[error("not connected")]
    NotConnected,

    /// A transport-level error (connect refused, bind failure, socket error).
    #[error("transport error: {0}")]
    Transport(String),

    /// The control connection was closed or reset by the peer.
    #[error("connection lost")]
    ConnectionLost,

    /// A value could not be encoded on the wire.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
