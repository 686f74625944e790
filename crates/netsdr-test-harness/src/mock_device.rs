//! Scripted NetSDR receiver on localhost.
//!
//! [`MockDevice`] listens on a real TCP port and behaves like a receiver's
//! control interface: every well-formed control item is echoed back as its
//! ACK, configured item codes are answered with a NAK, and tests can inject
//! unsolicited messages or raw bytes. When a data port is configured it
//! sends IQ data packets over real UDP, either on demand or as a timed
//! stream while the receiver is running.
//!
//! Connections are served one at a time; a new client is accepted after the
//! previous one disconnects.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_test_harness::{MockDevice, MockDeviceConfig};
//! use netsdr_core::ControlItemCode;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let device = MockDevice::start_with(MockDeviceConfig {
//!     nak_items: vec![ControlItemCode::ReceiverFrequency],
//!     ..Default::default()
//! })
//! .await?;
//! let addr = device.control_addr();
//! // ... connect a client to `addr` ...
//! # Ok(())
//! # }
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use netsdr_core::error::{Error, Result};
use netsdr_core::types::{ControlItemCode, ControlItemMessage, MessageType};
use netsdr_protocol::codec;
use netsdr_protocol::framer::ControlFramer;

use crate::packets::PacketGenerator;

/// Behavior of a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    /// Item codes answered with a NAK instead of an ACK.
    pub nak_items: Vec<ControlItemCode>,
    /// Local UDP port IQ data is sent to, on 127.0.0.1.
    pub data_port: Option<u16>,
    /// Send a packet every interval while the receiver is running.
    pub stream_interval: Option<Duration>,
    /// Seed for generated sample bytes.
    pub seed: u64,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            nak_items: Vec::new(),
            data_port: None,
            stream_interval: None,
            seed: 0x4E53,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    received: Vec<ControlItemMessage>,
    running: bool,
    frequency: Option<(u8, i64)>,
    connections: usize,
}

enum DeviceCommand {
    Write(Vec<u8>),
    DropClient,
}

/// A scripted receiver serving the control protocol on localhost.
pub struct MockDevice {
    control_addr: SocketAddr,
    data_socket: UdpSocket,
    data_target: Option<SocketAddr>,
    state: Arc<Mutex<DeviceState>>,
    command_tx: mpsc::UnboundedSender<DeviceCommand>,
    task: JoinHandle<()>,
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockDevice {
    /// Start a device that ACKs everything and sends no data.
    pub async fn start() -> Result<Self> {
        Self::start_with(MockDeviceConfig::default()).await
    }

    /// Start a device with the given behavior.
    pub async fn start_with(config: MockDeviceConfig) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock device: {}", e)))?;
        let control_addr = listener.local_addr()?;
        let data_socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let data_target = config
            .data_port
            .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)));

        let state = Arc::new(Mutex::new(DeviceState::default()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        debug!(addr = %control_addr, "mock device listening");

        let task = tokio::spawn(accept_loop(
            listener,
            config,
            data_target,
            state.clone(),
            command_rx,
        ));

        Ok(Self {
            control_addr,
            data_socket,
            data_target,
            state,
            command_tx,
            task,
        })
    }

    /// Address of the control port.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Every control message received from clients, in order.
    pub fn received(&self) -> Vec<ControlItemMessage> {
        lock(&self.state).received.clone()
    }

    /// Whether the last receiver state command started the receiver.
    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Last (channel byte, frequency) set by a client.
    pub fn frequency(&self) -> Option<(u8, i64)> {
        lock(&self.state).frequency
    }

    /// Number of control connections accepted so far.
    pub fn connections(&self) -> usize {
        lock(&self.state).connections
    }

    /// Wait until at least `count` control messages have been received.
    pub async fn wait_for_received(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if lock(&self.state).received.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        lock(&self.state).received.len() >= count
    }

    /// Send an unsolicited control item to the connected client.
    pub fn send_unsolicited(&self, item_code: ControlItemCode, parameters: &[u8]) -> Result<()> {
        let bytes =
            codec::encode_control_item(MessageType::UnsolicitedControlItem, item_code, parameters)?;
        self.send_raw(&bytes);
        Ok(())
    }

    /// Write raw bytes to the connected client.
    pub fn send_raw(&self, bytes: &[u8]) {
        let _ = self.command_tx.send(DeviceCommand::Write(bytes.to_vec()));
    }

    /// Close the current client connection from the device side.
    pub fn drop_client(&self) {
        let _ = self.command_tx.send(DeviceCommand::DropClient);
    }

    /// Send one datagram to the configured data port.
    pub async fn send_datagram(&self, datagram: &[u8]) -> Result<()> {
        let target = self
            .data_target
            .ok_or_else(|| Error::InvalidParameter("mock device has no data port".into()))?;
        self.data_socket.send_to(datagram, target).await?;
        Ok(())
    }

    /// Send several encoded data packets in order.
    pub async fn send_packets(&self, packets: &[Bytes]) -> Result<()> {
        for packet in packets {
            self.send_datagram(packet).await?;
        }
        Ok(())
    }

    /// Stop serving.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: MockDeviceConfig,
    data_target: Option<SocketAddr>,
    state: Arc<Mutex<DeviceState>>,
    mut command_rx: mpsc::UnboundedReceiver<DeviceCommand>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                debug!(error = %e, "mock device accept failed");
                return;
            }
        };
        debug!(peer = %peer, "mock device accepted client");
        lock(&state).connections += 1;

        serve(stream, &config, data_target, &state, &mut command_rx).await;

        lock(&state).running = false;
        debug!(peer = %peer, "mock device client gone");
    }
}

async fn serve(
    mut stream: TcpStream,
    config: &MockDeviceConfig,
    data_target: Option<SocketAddr>,
    state: &Mutex<DeviceState>,
    command_rx: &mut mpsc::UnboundedReceiver<DeviceCommand>,
) {
    let mut framer = ControlFramer::new();
    let mut streamer: Option<Streamer> = None;
    let mut buf = [0u8; 1024];

    'conn: loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break 'conn,
                    Ok(n) => n,
                };
                for message in framer.push(&buf[..n]) {
                    let reply = handle_message(&message, config, state);
                    if let Some(bytes) = &reply.bytes {
                        if stream.write_all(bytes).await.is_err() {
                            break 'conn;
                        }
                    }
                    match reply.run {
                        Some(true) if streamer.is_none() => {
                            if let (Some(target), Some(interval)) =
                                (data_target, config.stream_interval)
                            {
                                let task = stream_packets(target, interval, config.seed);
                                streamer = Some(Streamer(tokio::spawn(task)));
                            }
                        }
                        Some(false) => streamer = None,
                        _ => {}
                    }
                }
                if framer.is_desynchronized() {
                    break 'conn;
                }
            }
            command = command_rx.recv() => match command {
                Some(DeviceCommand::Write(bytes)) => {
                    if stream.write_all(&bytes).await.is_err() {
                        break 'conn;
                    }
                }
                Some(DeviceCommand::DropClient) | None => break 'conn,
            },
        }
    }

    drop(streamer);
    let _ = stream.shutdown().await;
}

/// Aborts the packet stream when dropped, including when the serving task
/// itself is aborted.
struct Streamer(JoinHandle<()>);

impl Drop for Streamer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Reply {
    bytes: Option<Bytes>,
    /// `Some(start)` when an ACKed receiver state command changes run/stop.
    run: Option<bool>,
}

fn handle_message(
    message: &ControlItemMessage,
    config: &MockDeviceConfig,
    state: &Mutex<DeviceState>,
) -> Reply {
    let mut state = lock(state);
    state.received.push(message.clone());

    let Some(item_code) = message.item_code else {
        return Reply {
            bytes: None,
            run: None,
        };
    };

    if config.nak_items.contains(&item_code) {
        debug!(item = %item_code, "mock device rejecting command");
        return Reply {
            bytes: Some(codec::encode_nak(MessageType::SetControlItem)),
            run: None,
        };
    }

    let mut run = None;
    match item_code {
        ControlItemCode::ReceiverState => {
            if let Some(&run_stop) = message.parameters.get(1) {
                let start = run_stop == 0x02;
                state.running = start;
                run = Some(start);
            }
        }
        ControlItemCode::ReceiverFrequency => {
            if let Ok(frequency) = codec::decode_frequency_parameters(&message.parameters) {
                state.frequency = Some(frequency);
            }
        }
        ControlItemCode::Unknown(_) => {}
    }

    let ack = codec::encode_control_item(
        message.header.message_type,
        item_code,
        &message.parameters,
    )
    .ok();

    Reply { bytes: ack, run }
}

async fn stream_packets(target: SocketAddr, interval: Duration, seed: u64) {
    let socket = match UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(error = %e, "mock device could not bind data socket");
            return;
        }
    };
    let mut generator = PacketGenerator::new(seed);
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        let Ok(packet) = generator.next_packet() else {
            return;
        };
        if socket.send_to(&packet, target).await.is_err() {
            return;
        }
    }
}
