//! Transport implementations for the NetSDR client.
//!
//! Concrete tokio-backed implementations of the socket traits in
//! `netsdr-core`:
//!
//! - [`TcpTransport`]: the TCP control channel
//! - [`UdpTransport`]: the UDP IQ data channel
//! - [`NetworkSocketFactory`]: opens both for the client
//!
//! # Example
//!
//! ```no_run
//! use netsdr_transport::NetworkSocketFactory;
//! use netsdr_core::transport::SocketFactory;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let factory = NetworkSocketFactory::new();
//! let control = factory.connect_stream("192.168.1.50:50000".parse().unwrap()).await?;
//! let data = factory.bind_datagram("0.0.0.0:60000".parse().unwrap()).await?;
//! # Ok(())
//! # }
//! ```

pub mod factory;
pub mod tcp;
pub mod udp;

pub use factory::NetworkSocketFactory;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;
