//! netsdr-core: Core types, socket traits, and error definitions for the
//! NetSDR client.
//!
//! This crate holds the pieces every other crate in the workspace agrees on:
//! the wire data model, the socket capability traits, lifecycle events, and
//! the shared error type. It does no I/O.
//!
//! # Key types
//!
//! - [`Header`], [`ControlItemMessage`], [`DataItemMessage`] -- decoded wire messages
//! - [`StreamSocket`], [`DatagramSocket`], [`SocketFactory`] -- socket abstractions
//! - [`ClientEvent`] -- lifecycle notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::ClientEvent;
pub use transport::{DatagramSocket, SocketFactory, StreamSocket};
pub use types::*;
