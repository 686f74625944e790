//! NetSDR receiver client.
//!
//! [`NetSdrClient`] owns one control session at a time. A session is a TCP
//! control socket driven by the IO and framer tasks (see `io`), a
//! [`Correlator`] reading the response channel, and, while streaming, the
//! UDP data task (see `data`). Everything a session spawns hangs off one
//! [`CancellationToken`].
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected -> Streaming ->
//! Connected -> Disconnected`. A control stream that ends on its own moves
//! the client to `Disconnected` and emits [`ClientEvent::ConnectionLost`];
//! reconnecting is the caller's job.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use netsdr_core::error::{Error, Result};
use netsdr_core::events::ClientEvent;
use netsdr_core::transport::SocketFactory;
use netsdr_core::types::{
    CaptureMode, ChannelId, ClientState, ControlItemCode, ControlItemMessage, DataItemMessage,
};
use netsdr_protocol::codec;

use crate::builder::ClientConfig;
use crate::correlator::Correlator;
use crate::data::{DataSink, DataStream, spawn_data_loop};
use crate::io::{ControlIo, spawn_control_io};
use crate::reorder::ReorderBuffer;
use crate::state::{SessionLink, StateCell};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel capacity for unsolicited control messages.
const UNSOLICITED_CHANNEL_CAPACITY: usize = 256;

struct Session {
    cancel: CancellationToken,
    control: ControlIo,
    correlator: Arc<Correlator>,
    data: Option<DataStream>,
    remote: SocketAddr,
}

impl Session {
    /// Cancel every task of this session and wait for them to exit.
    async fn close(mut self) {
        self.cancel.cancel();
        if let Some(data) = self.data.take() {
            data.stop().await;
        }
        self.control.join().await;
        debug!(remote = %self.remote, "session closed");
    }
}

/// Async client for a NetSDR receiver.
///
/// Built with [`NetSdrClientBuilder`](crate::NetSdrClientBuilder). All
/// methods take `&self`; commands are serialized internally so only one
/// correlator wait is outstanding at a time.
pub struct NetSdrClient {
    config: ClientConfig,
    factory: Arc<dyn SocketFactory>,
    state: Arc<StateCell>,
    events: broadcast::Sender<ClientEvent>,
    unsolicited: broadcast::Sender<ControlItemMessage>,
    data_sink: DataSink,
    session: Mutex<Option<Session>>,
    command_lock: Mutex<()>,
}

impl NetSdrClient {
    pub(crate) fn new(config: ClientConfig, factory: Arc<dyn SocketFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (unsolicited, _) = broadcast::channel(UNSOLICITED_CHANNEL_CAPACITY);
        Self {
            config,
            factory,
            state: Arc::new(StateCell::new(ClientState::Disconnected)),
            events,
            unsolicited,
            data_sink: DataSink::default(),
            session: Mutex::new(None),
            command_lock: Mutex::new(()),
        }
    }

    /// The settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current lifecycle state. Never blocks.
    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    /// Whether commands can be issued (Connected or Streaming).
    pub fn is_connected(&self) -> bool {
        self.state.get().accepts_commands()
    }

    /// Open the control connection.
    ///
    /// A no-op when already connected. A session that ended on its own is
    /// torn down first. On failure the client stays `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.session.lock().await;

        if slot.is_some() && self.state.get().accepts_commands() {
            debug!("connect called while connected, ignoring");
            return Ok(());
        }

        if let Some(stale) = slot.take() {
            debug!("tearing down lost session before reconnecting");
            stale.close().await;
        }

        self.state.set(ClientState::Connecting);

        let remote = match self.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                self.state.set(ClientState::Disconnected);
                return Err(e);
            }
        };

        debug!(%remote, "connecting control channel");
        let socket = match self.factory.connect_stream(remote).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(%remote, error = %e, "control connect failed");
                self.state.set(ClientState::Disconnected);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let link = SessionLink {
            cancel: cancel.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
        };
        let control = spawn_control_io(socket, link, response_tx, self.unsolicited.clone());

        *slot = Some(Session {
            cancel,
            control,
            correlator: Arc::new(Correlator::new(response_rx)),
            data: None,
            remote,
        });
        self.state.set(ClientState::Connected);
        info!(%remote, "connected to receiver");
        let _ = self.events.send(ClientEvent::Connected { addr: remote });
        Ok(())
    }

    /// Close the control connection and stop any data stream.
    ///
    /// Buffered data packets are flushed to the data subscriber before the
    /// stream stops. Safe to call when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        let remote = session.remote;
        session.close().await;

        let previous = self.state.swap(ClientState::Disconnected);
        if previous.accepts_commands() {
            info!(%remote, "disconnected from receiver");
            let _ = self.events.send(ClientEvent::Disconnected);
        }
        Ok(())
    }

    /// Start or stop the receiver.
    ///
    /// On an acknowledged start the data socket is bound at the configured
    /// data port and the client moves to `Streaming`; a start while already
    /// streaming keeps the existing socket. On an acknowledged stop the data
    /// task is stopped and the client returns to `Connected`.
    pub async fn set_receiver_state(
        &self,
        start: bool,
        is_complex_data: bool,
        capture_mode: CaptureMode,
        fifo_size: u8,
    ) -> Result<()> {
        let _guard = self.command_lock.lock().await;

        let command =
            codec::encode_set_receiver_state(is_complex_data, start, capture_mode, fifo_size);
        self.execute(command, ControlItemCode::ReceiverState).await?;

        if start {
            self.start_data_stream().await
        } else {
            self.stop_data_stream().await;
            Ok(())
        }
    }

    /// Start a 16-bit FIFO capture using the configured data type.
    pub async fn start_capture(&self, fifo_size: u8) -> Result<()> {
        self.set_receiver_state(
            true,
            self.config.complex_data,
            CaptureMode::Fifo16Bit,
            fifo_size,
        )
        .await
    }

    /// Stop the capture started by [`start_capture`](Self::start_capture).
    pub async fn stop_capture(&self) -> Result<()> {
        self.set_receiver_state(false, self.config.complex_data, CaptureMode::Fifo16Bit, 0)
            .await
    }

    /// Tune `channel` to `frequency_hz`. Only the low 40 bits are sent.
    pub async fn set_receiver_frequency(
        &self,
        channel: ChannelId,
        frequency_hz: i64,
    ) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        let command = codec::encode_set_receiver_frequency(channel, frequency_hz);
        self.execute(command, ControlItemCode::ReceiverFrequency).await?;
        debug!(%channel, frequency_hz, "receiver frequency set");
        Ok(())
    }

    /// Local address of the UDP data socket while streaming.
    pub async fn data_local_addr(&self) -> Option<SocketAddr> {
        let slot = self.session.lock().await;
        slot.as_ref()
            .and_then(|session| session.data.as_ref())
            .filter(|data| !data.is_finished())
            .map(|data| data.local_addr())
    }

    /// Receive reordered, de-duplicated data packets.
    ///
    /// Replaces any previous data subscriber. When the returned channel is
    /// full, new packets are dropped rather than stalling the data task.
    pub fn subscribe_data(&self) -> mpsc::Receiver<DataItemMessage> {
        self.data_sink.subscribe(self.config.data_channel_capacity)
    }

    /// Receive unsolicited control messages from the receiver.
    pub fn subscribe_unsolicited(&self) -> broadcast::Receiver<ControlItemMessage> {
        self.unsolicited.subscribe()
    }

    /// Receive lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Data packets dropped because the data subscriber fell behind.
    pub fn dropped_data_packets(&self) -> u64 {
        self.data_sink.dropped()
    }

    /// Send `command` and wait for its answer. Caller holds `command_lock`.
    async fn execute(&self, command: Bytes, item: ControlItemCode) -> Result<ControlItemMessage> {
        if !self.state.get().accepts_commands() {
            return Err(Error::NotConnected);
        }

        let (writer, correlator) = {
            let slot = self.session.lock().await;
            let session = slot.as_ref().ok_or(Error::NotConnected)?;
            (session.control.writer(), session.correlator.clone())
        };

        if self.config.discard_stale_responses {
            let dropped = correlator.discard_pending().await;
            if dropped > 0 {
                debug!(dropped, "discarded stale responses");
            }
        }

        debug!(%item, bytes = command.len(), "sending command");
        let timeout = self.config.response_timeout;
        let exchange = async {
            writer.send(command).await?;
            correlator.await_next(timeout).await
        };
        let reply = match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(%item, "command timed out");
                return Err(Error::Timeout);
            }
        };
        if reply.is_nak() {
            warn!(%item, "receiver rejected command");
            return Err(Error::DeviceRejected(format!("{} command was NAKed", item)));
        }
        debug!(%item, reply_item = ?reply.item_code, "command acknowledged");
        Ok(reply)
    }

    async fn start_data_stream(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(Error::NotConnected)?;

        if session.data.as_ref().is_some_and(|data| !data.is_finished()) {
            debug!("receiver restarted while streaming, keeping data socket");
            return Ok(());
        }
        if let Some(finished) = session.data.take() {
            finished.stop().await;
        }

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], self.config.data_port));
        let socket = self.factory.bind_datagram(bind_addr).await?;
        let local_addr = socket.local_addr()?;

        let buffer =
            ReorderBuffer::new(self.config.reorder_capacity, self.config.sequence_ordering);
        session.data = Some(spawn_data_loop(
            socket,
            local_addr,
            buffer,
            self.data_sink.clone(),
            session.cancel.child_token(),
            self.state.clone(),
            self.events.clone(),
        ));

        if !self.state.transition(ClientState::Connected, ClientState::Streaming) {
            warn!(state = ?self.state.get(), "state changed while starting data stream");
        }
        info!(%local_addr, "streaming started");
        let _ = self.events.send(ClientEvent::StreamingStarted { local_addr });
        Ok(())
    }

    async fn stop_data_stream(&self) {
        let data = {
            let mut slot = self.session.lock().await;
            slot.as_mut().and_then(|session| session.data.take())
        };
        if let Some(data) = data {
            data.stop().await;
            info!("streaming stopped");
        }
        self.state.transition(ClientState::Streaming, ClientState::Connected);
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let target = (self.config.host.as_str(), self.config.control_port);
        let mut addrs = tokio::net::lookup_host(target).await.map_err(|e| {
            Error::Transport(format!(
                "failed to resolve {}:{}: {}",
                self.config.host, self.config.control_port, e
            ))
        })?;
        addrs.next().ok_or_else(|| {
            Error::Transport(format!(
                "no address found for {}:{}",
                self.config.host, self.config.control_port
            ))
        })
    }
}

impl Drop for NetSdrClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().as_ref() {
            debug!(remote = %session.remote, "client dropped, cancelling session");
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use netsdr_core::types::MessageType;
    use netsdr_test_harness::{MockSocketFactory, MockStreamHandle, PacketGenerator};

    use crate::builder::NetSdrClientBuilder;

    fn client(factory: &MockSocketFactory) -> NetSdrClient {
        NetSdrClientBuilder::new()
            .host("127.0.0.1")
            .response_timeout(Duration::from_millis(200))
            .reorder_capacity(0)
            .socket_factory(Arc::new(factory.clone()))
            .build()
            .unwrap()
    }

    async fn connected() -> (NetSdrClient, MockSocketFactory, MockStreamHandle) {
        let factory = MockSocketFactory::new();
        let control = factory.add_stream();
        control.echo_acks();
        let client = client(&factory);
        client.connect().await.unwrap();
        (client, factory, control)
    }

    async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn connect_uses_control_port() {
        let factory = MockSocketFactory::new();
        factory.add_stream();
        let client = client(&factory);
        let mut events = client.subscribe();

        client.connect().await.unwrap();

        assert_eq!(client.state(), ClientState::Connected);
        let expected: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        assert_eq!(factory.connects(), vec![expected]);
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected { addr: expected });
    }

    #[tokio::test]
    async fn connect_twice_is_noop() {
        let (client, factory, _control) = connected().await;
        client.connect().await.unwrap();
        assert_eq!(factory.connects().len(), 1);
    }

    #[tokio::test]
    async fn connect_failure_leaves_disconnected() {
        let factory = MockSocketFactory::new();
        let client = client(&factory);

        let result = client.connect().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, _factory, control) = connected().await;
        let mut events = client.subscribe();

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(control.was_shut_down());
        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_close_then_reconnect() {
        let (client, factory, control) = connected().await;
        let mut events = client.subscribe();
        let second = factory.add_stream();
        second.echo_acks();

        control.close();
        assert_eq!(next_event(&mut events).await, ClientEvent::ConnectionLost);
        assert_eq!(client.state(), ClientState::Disconnected);

        let result = client
            .set_receiver_frequency(ChannelId::Channel1, 7_000_000)
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));

        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        client
            .set_receiver_frequency(ChannelId::Channel1, 7_000_000)
            .await
            .unwrap();
        assert_eq!(second.sent().len(), 1);
    }

    // ---------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn command_while_disconnected_does_no_io() {
        let factory = MockSocketFactory::new();
        let client = client(&factory);

        let result = client.start_capture(10).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(factory.binds().is_empty());
    }

    #[tokio::test]
    async fn frequency_command_bytes() {
        let (client, _factory, control) = connected().await;

        client
            .set_receiver_frequency(ChannelId::Channel1, 14_010_000)
            .await
            .unwrap();

        let sent = control.sent();
        assert_eq!(
            sent,
            vec![vec![0x0A, 0x00, 0x20, 0x00, 0x00, 0x90, 0xC6, 0xD5, 0x00, 0x00]]
        );
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn nak_is_device_rejected() {
        let (client, _factory, control) = connected().await;
        let nak = codec::encode_nak(MessageType::SetControlItem).to_vec();
        control.set_responder(move |_| vec![nak.clone()]);

        let result = client
            .set_receiver_frequency(ChannelId::Channel2, 10_000_000)
            .await;
        assert!(matches!(result, Err(Error::DeviceRejected(_))));
    }

    #[tokio::test]
    async fn stale_nak_copy_answers_next_command() {
        let (client, _factory, control) = connected().await;
        let nak = codec::encode_nak(MessageType::SetControlItem).to_vec();
        control.set_responder(move |_| vec![nak.clone()]);

        assert!(client.set_receiver_frequency(ChannelId::Channel1, 1).await.is_err());

        // The second copy of the NAK is still queued.
        control.echo_acks();
        let result = client.set_receiver_frequency(ChannelId::Channel1, 2).await;
        assert!(matches!(result, Err(Error::DeviceRejected(_))));
    }

    #[tokio::test]
    async fn discard_stale_responses_skips_nak_copy() {
        let factory = MockSocketFactory::new();
        let control = factory.add_stream();
        let client = NetSdrClientBuilder::new()
            .host("127.0.0.1")
            .response_timeout(Duration::from_millis(200))
            .discard_stale_responses(true)
            .socket_factory(Arc::new(factory.clone()))
            .build()
            .unwrap();
        client.connect().await.unwrap();

        let nak = codec::encode_nak(MessageType::SetControlItem).to_vec();
        control.set_responder(move |_| vec![nak.clone()]);
        assert!(client.set_receiver_frequency(ChannelId::Channel1, 1).await.is_err());

        // Let the framer deliver the second copy before the next command.
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.echo_acks();
        client
            .set_receiver_frequency(ChannelId::Channel1, 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_response_times_out() {
        let factory = MockSocketFactory::new();
        factory.add_stream();
        let client = client(&factory);
        client.connect().await.unwrap();

        let result = client.set_receiver_frequency(ChannelId::All, 5_000_000).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_disconnect_completes() {
        let (client, _factory, control) = connected().await;
        control.stall_sends(true);

        let result = client.set_receiver_frequency(ChannelId::Channel1, 7_000_000).await;
        assert!(matches!(result, Err(Error::Timeout)));

        tokio::time::timeout(Duration::from_secs(2), client.disconnect())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(control.was_shut_down());
    }

    // ---------------------------------------------------------------
    // Streaming
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn start_and_stop_capture() {
        let (client, factory, control) = connected().await;
        let data = factory.add_datagram();
        let mut events = client.subscribe();
        let mut rx = client.subscribe_data();

        client.start_capture(10).await.unwrap();
        assert_eq!(client.state(), ClientState::Streaming);
        let bound: SocketAddr = "0.0.0.0:60000".parse().unwrap();
        assert_eq!(factory.binds(), vec![bound]);
        assert_eq!(client.data_local_addr().await, Some(bound));
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::StreamingStarted { local_addr: bound }
        );
        assert_eq!(
            control.sent()[0],
            vec![0x08, 0x00, 0x18, 0x00, 0x00, 0x02, 0x01, 0x0A]
        );

        let mut generator = PacketGenerator::new(4);
        data.push(&generator.packet(73).unwrap());
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.sequence_number, 73);

        client.stop_capture().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.data_local_addr().await, None);
        assert_eq!(next_event(&mut events).await, ClientEvent::StreamingStopped);
    }

    #[tokio::test]
    async fn restart_while_streaming_keeps_socket() {
        let (client, factory, _control) = connected().await;
        let _data = factory.add_datagram();

        client.start_capture(10).await.unwrap();
        client.start_capture(10).await.unwrap();

        assert_eq!(factory.binds().len(), 1);
        assert_eq!(client.state(), ClientState::Streaming);
    }

    #[tokio::test]
    async fn bind_failure_stays_connected() {
        let (client, _factory, _control) = connected().await;

        let result = client.start_capture(10).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn rejected_start_does_not_bind() {
        let (client, factory, control) = connected().await;
        let _data = factory.add_datagram();
        let nak = codec::encode_nak(MessageType::SetControlItem).to_vec();
        control.set_responder(move |_| vec![nak.clone()]);

        let result = client.start_capture(10).await;
        assert!(matches!(result, Err(Error::DeviceRejected(_))));
        assert!(factory.binds().is_empty());
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn disconnect_flushes_reorder_buffer() {
        let factory = MockSocketFactory::new();
        let control = factory.add_stream();
        control.echo_acks();
        let data = factory.add_datagram();
        let client = NetSdrClientBuilder::new()
            .host("127.0.0.1")
            .reorder_capacity(5)
            .socket_factory(Arc::new(factory.clone()))
            .build()
            .unwrap();
        let mut rx = client.subscribe_data();

        client.connect().await.unwrap();
        client.start_capture(10).await.unwrap();

        let mut generator = PacketGenerator::new(8);
        for sequence in [12, 10, 11] {
            data.push(&generator.packet(sequence).unwrap());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        client.disconnect().await.unwrap();

        let delivered: Vec<i16> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.sequence_number)
            .collect();
        assert_eq!(delivered, vec![10, 11, 12]);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn data_socket_failure_returns_to_connected() {
        let (client, factory, _control) = connected().await;
        let data = factory.add_datagram();
        let mut events = client.subscribe();

        client.start_capture(10).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::StreamingStarted { .. }
        ));

        data.fail("interface down");
        assert_eq!(next_event(&mut events).await, ClientEvent::StreamingStopped);
        assert_eq!(client.state(), ClientState::Connected);
        assert!(client.is_connected());
    }

    // ---------------------------------------------------------------
    // Unsolicited messages
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn unsolicited_messages_reach_subscribers() {
        let (client, _factory, control) = connected().await;
        let mut unsolicited = client.subscribe_unsolicited();

        let msg = codec::encode_control_item(
            MessageType::UnsolicitedControlItem,
            ControlItemCode::ReceiverFrequency,
            &[0x00, 0x80, 0x96, 0x98, 0x00, 0x00],
        )
        .unwrap();
        control.push(&msg);

        let received = tokio::time::timeout(Duration::from_secs(2), unsolicited.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.item_code, Some(ControlItemCode::ReceiverFrequency));
        assert_eq!(
            codec::decode_frequency_parameters(&received.parameters).unwrap(),
            (0x00, 10_000_000)
        );
    }
}
