//! netsdr-test-harness: Test doubles for the NetSDR client.
//!
//! - [`MockStreamSocket`] / [`MockDatagramSocket`] and [`MockSocketFactory`]
//!   for deterministic in-memory tests of the client's tasks
//! - [`MockDevice`] for end-to-end tests over real localhost sockets
//! - [`PacketGenerator`] for reproducible IQ data packets

pub mod mock_datagram;
pub mod mock_device;
pub mod mock_factory;
pub mod mock_stream;
pub mod packets;

pub use mock_datagram::{MockDatagramHandle, MockDatagramSocket};
pub use mock_device::{MockDevice, MockDeviceConfig};
pub use mock_factory::MockSocketFactory;
pub use mock_stream::{MockStreamHandle, MockStreamSocket};
pub use packets::{PacketGenerator, data_message};
