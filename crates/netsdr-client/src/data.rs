//! IQ data stream task.
//!
//! Receives data item datagrams, decodes them, runs them through the
//! [`ReorderBuffer`], and hands evicted packets to the current data
//! subscriber. Runs on a child of the session token so stopping capture
//! does not touch the control channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use netsdr_core::events::ClientEvent;
use netsdr_core::transport::DatagramSocket;
use netsdr_core::types::{ClientState, DataItemMessage};
use netsdr_protocol::codec::{self, MAX_DATA_PACKET_LEN};

use crate::reorder::ReorderBuffer;
use crate::state::StateCell;

/// Delivery point for reordered data packets.
///
/// Holds at most one subscriber; subscribing again replaces it. Delivery
/// never waits: a full channel drops the packet.
#[derive(Clone, Default)]
pub(crate) struct DataSink {
    subscriber: Arc<Mutex<Option<mpsc::Sender<DataItemMessage>>>>,
    dropped: Arc<AtomicU64>,
}

impl DataSink {
    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<DataItemMessage>>> {
        self.subscriber
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn subscribe(&self, capacity: usize) -> mpsc::Receiver<DataItemMessage> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.lock() = Some(tx);
        rx
    }

    pub(crate) fn deliver(&self, message: DataItemMessage) {
        let guard = self.lock();
        let Some(tx) = guard.as_ref() else {
            trace!(sequence = message.sequence_number, "no data subscriber, dropping packet");
            return;
        };
        match tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    sequence = message.sequence_number,
                    dropped, "data subscriber is slow, dropping packet"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("data subscriber gone");
            }
        }
    }

    /// Packets dropped because the subscriber's channel was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to a running data stream.
pub(crate) struct DataStream {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl DataStream {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the task ended on its own (socket failure).
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it to drain the reorder buffer.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Start receiving on `socket`. `cancel` should be a child of the session
/// token.
pub(crate) fn spawn_data_loop(
    socket: Box<dyn DatagramSocket>,
    local_addr: SocketAddr,
    buffer: ReorderBuffer,
    sink: DataSink,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    events: broadcast::Sender<ClientEvent>,
) -> DataStream {
    let task = tokio::spawn(data_loop(
        socket,
        buffer,
        sink,
        cancel.clone(),
        state,
        events,
    ));
    DataStream {
        cancel,
        local_addr,
        task,
    }
}

async fn data_loop(
    mut socket: Box<dyn DatagramSocket>,
    mut buffer: ReorderBuffer,
    sink: DataSink,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    events: broadcast::Sender<ClientEvent>,
) {
    debug!(capacity = buffer.capacity(), "data task started");
    // One spare byte so oversized datagrams fail to decode instead of
    // being silently truncated to a valid length.
    let mut buf = vec![0u8; MAX_DATA_PACKET_LEN + 1];
    let mut received: u64 = 0;
    let mut malformed: u64 = 0;

    let failed = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break false,

            read = socket.receive(&mut buf) => match read {
                Ok(n) => match codec::decode_data_message(&buf[..n]) {
                    Ok(message) => {
                        received += 1;
                        trace!(
                            sequence = message.sequence_number,
                            bytes = n,
                            "data packet received"
                        );
                        if let Some(out) = buffer.feed(message) {
                            sink.deliver(out);
                        }
                    }
                    Err(e) => {
                        malformed += 1;
                        warn!(bytes = n, "discarding malformed data packet: {}", e);
                    }
                },
                Err(e) => {
                    error!(error = %e, "data socket receive failed");
                    break true;
                }
            },
        }
    };

    for message in buffer.drain() {
        sink.deliver(message);
    }

    if let Err(e) = socket.close().await {
        warn!(error = %e, "data socket close failed");
    }

    if failed {
        state.transition(ClientState::Streaming, ClientState::Connected);
    }

    debug!(
        received,
        malformed,
        duplicates = buffer.duplicates_dropped(),
        dropped = sink.dropped(),
        "data task exited"
    );
    let _ = events.send(ClientEvent::StreamingStopped);
}
