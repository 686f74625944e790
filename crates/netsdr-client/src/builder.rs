//! NetSdrClientBuilder -- fluent builder for constructing [`NetSdrClient`]
//! instances.
//!
//! Separates configuration from construction. Building does not touch the
//! network; call [`NetSdrClient::connect`] afterwards.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_client::NetSdrClientBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let client = NetSdrClientBuilder::new()
//!     .host("192.168.1.50")
//!     .response_timeout(Duration::from_secs(2))
//!     .build()?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use netsdr_core::error::{Error, Result};
use netsdr_core::transport::SocketFactory;
use netsdr_transport::NetworkSocketFactory;

use crate::client::NetSdrClient;
use crate::reorder::SequenceOrdering;

/// Default TCP control port on the receiver.
pub const DEFAULT_CONTROL_PORT: u16 = 50000;

/// Default local UDP port for IQ data.
pub const DEFAULT_DATA_PORT: u16 = 60000;

/// Default wait for a command response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default reorder window.
pub const DEFAULT_REORDER_CAPACITY: usize = 5;

/// Default bound of the delivered-data channel.
pub const DEFAULT_DATA_CHANNEL_CAPACITY: usize = 1024;

/// Client settings. Fixed for the client's lifetime.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Receiver IP address or hostname.
    pub host: String,
    /// TCP control port on the receiver.
    pub control_port: u16,
    /// Local UDP port bound for data items. 0 picks an ephemeral port.
    pub data_port: u16,
    /// How long a command waits for its response.
    pub response_timeout: Duration,
    /// Reorder window size. 0 delivers packets in arrival order.
    pub reorder_capacity: usize,
    /// Complex/real flag used by [`NetSdrClient::start_capture`].
    pub complex_data: bool,
    /// Bound of the channel returned by [`NetSdrClient::subscribe_data`].
    pub data_channel_capacity: usize,
    /// How the reorder buffer compares sequence numbers.
    pub sequence_ordering: SequenceOrdering,
    /// Drop already queued responses before each command.
    ///
    /// A NAK reaches the response queue twice, so without this a command
    /// that follows a rejected one may read the stale copy as its answer.
    pub discard_stale_responses: bool,
}

impl ClientConfig {
    /// Defaults for everything but the host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reorder_capacity: DEFAULT_REORDER_CAPACITY,
            complex_data: false,
            data_channel_capacity: DEFAULT_DATA_CHANNEL_CAPACITY,
            sequence_ordering: SequenceOrdering::default(),
            discard_stale_responses: false,
        }
    }
}

/// Fluent builder for [`NetSdrClient`].
pub struct NetSdrClientBuilder {
    host: Option<String>,
    control_port: u16,
    data_port: u16,
    response_timeout: Duration,
    reorder_capacity: usize,
    complex_data: bool,
    data_channel_capacity: usize,
    sequence_ordering: SequenceOrdering,
    discard_stale_responses: bool,
    factory: Option<Arc<dyn SocketFactory>>,
}

impl NetSdrClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        NetSdrClientBuilder {
            host: None,
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reorder_capacity: DEFAULT_REORDER_CAPACITY,
            complex_data: false,
            data_channel_capacity: DEFAULT_DATA_CHANNEL_CAPACITY,
            sequence_ordering: SequenceOrdering::default(),
            discard_stale_responses: false,
            factory: None,
        }
    }

    /// Set the receiver's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the TCP control port (default: 50000).
    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Set the local UDP data port (default: 60000).
    pub fn data_port(mut self, port: u16) -> Self {
        self.data_port = port;
        self
    }

    /// Set the command response timeout (default: 5s).
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the reorder window (default: 5).
    pub fn reorder_capacity(mut self, capacity: usize) -> Self {
        self.reorder_capacity = capacity;
        self
    }

    /// Request complex IQ data from [`NetSdrClient::start_capture`]
    /// (default: false).
    pub fn complex_data(mut self, complex: bool) -> Self {
        self.complex_data = complex;
        self
    }

    /// Set the bound of the delivered-data channel (default: 1024).
    pub fn data_channel_capacity(mut self, capacity: usize) -> Self {
        self.data_channel_capacity = capacity;
        self
    }

    /// Select how sequence numbers are compared (default: signed).
    pub fn sequence_ordering(mut self, ordering: SequenceOrdering) -> Self {
        self.sequence_ordering = ordering;
        self
    }

    /// Drop queued responses before each command (default: false).
    pub fn discard_stale_responses(mut self, discard: bool) -> Self {
        self.discard_stale_responses = discard;
        self
    }

    /// Open sockets through `factory` instead of real tokio sockets.
    pub fn socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the [`NetSdrClient`]. Requires that [`host()`](Self::host)
    /// has been called.
    pub fn build(self) -> Result<NetSdrClient> {
        let host = self.host.ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;

        if self.data_channel_capacity == 0 {
            return Err(Error::InvalidParameter(
                "data channel capacity must be at least 1".into(),
            ));
        }

        let config = ClientConfig {
            host,
            control_port: self.control_port,
            data_port: self.data_port,
            response_timeout: self.response_timeout,
            reorder_capacity: self.reorder_capacity,
            complex_data: self.complex_data,
            data_channel_capacity: self.data_channel_capacity,
            sequence_ordering: self.sequence_ordering,
            discard_stale_responses: self.discard_stale_responses,
        };

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(NetworkSocketFactory::new()));

        Ok(NetSdrClient::new(config, factory))
    }
}

impl Default for NetSdrClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_without_host_fails() {
        let result = NetSdrClientBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn defaults_match_config_new() {
        let client = NetSdrClientBuilder::new().host("10.0.0.5").build().unwrap();
        let config = client.config();
        let expected = ClientConfig::new("10.0.0.5");

        assert_eq!(config.host, expected.host);
        assert_eq!(config.control_port, 50000);
        assert_eq!(config.data_port, 60000);
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.reorder_capacity, 5);
        assert!(!config.complex_data);
        assert_eq!(config.data_channel_capacity, 1024);
        assert_eq!(config.sequence_ordering, SequenceOrdering::Signed);
        assert!(!config.discard_stale_responses);
    }

    #[test]
    fn setters_are_applied() {
        let client = NetSdrClientBuilder::new()
            .host("sdr.local")
            .control_port(50001)
            .data_port(0)
            .response_timeout(Duration::from_millis(250))
            .reorder_capacity(0)
            .complex_data(true)
            .data_channel_capacity(8)
            .sequence_ordering(SequenceOrdering::Wrapping)
            .discard_stale_responses(true)
            .build()
            .unwrap();
        let config = client.config();

        assert_eq!(config.host, "sdr.local");
        assert_eq!(config.control_port, 50001);
        assert_eq!(config.data_port, 0);
        assert_eq!(config.response_timeout, Duration::from_millis(250));
        assert_eq!(config.reorder_capacity, 0);
        assert!(config.complex_data);
        assert_eq!(config.data_channel_capacity, 8);
        assert_eq!(config.sequence_ordering, SequenceOrdering::Wrapping);
        assert!(config.discard_stale_responses);
    }

    #[test]
    fn zero_data_channel_capacity_is_rejected() {
        let result = NetSdrClientBuilder::new()
            .host("10.0.0.5")
            .data_channel_capacity(0)
            .build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
