//! netsdr-client: Async client for NetSDR network receivers.
//!
//! Talks to the receiver over two sockets: a TCP control channel carrying
//! commands, their ACK/NAK replies and unsolicited notifications, and a UDP
//! data channel carrying IQ sample packets. Sockets are opened through a
//! [`SocketFactory`](netsdr_core::SocketFactory), so tests can swap in the
//! doubles from `netsdr-test-harness`.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_client::NetSdrClientBuilder;
//! use netsdr_core::ChannelId;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let client = NetSdrClientBuilder::new().host("192.168.1.50").build()?;
//! client.connect().await?;
//! client
//!     .set_receiver_frequency(ChannelId::Channel1, 14_010_000)
//!     .await?;
//!
//! let mut data = client.subscribe_data();
//! client.start_capture(10).await?;
//! while let Some(packet) = data.recv().await {
//!     println!("seq {} ({} bytes)", packet.sequence_number, packet.sample_bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod correlator;
mod data;
mod io;
pub mod reorder;
mod state;

pub use builder::{ClientConfig, NetSdrClientBuilder};
pub use client::NetSdrClient;
pub use correlator::Correlator;
pub use reorder::{ReorderBuffer, SequenceOrdering};
