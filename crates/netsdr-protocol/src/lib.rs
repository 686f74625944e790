//! netsdr-protocol: NetSDR wire codec and control stream framing.
//!
//! - [`codec`] -- pure encode/decode of headers, control items, and data packets
//! - [`framer`] -- reassembly of control messages from TCP reads, and routing

pub mod codec;
pub mod framer;

pub use framer::{Classification, ControlFramer, classify};
