//! Control channel tasks.
//!
//! One IO task owns the control socket exclusively. It runs a biased
//! `select!` over cancellation, outgoing write requests (the write pump),
//! and socket reads. Read chunks go to a separate framer task, which
//! reassembles messages, classifies them, and feeds the response and
//! unsolicited channels.
//!
//! Both tasks live until the session token is cancelled or the stream ends.

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use netsdr_core::error::{Error, Result};
use netsdr_core::transport::StreamSocket;
use netsdr_core::types::ControlItemMessage;
use netsdr_protocol::framer::{self, ControlFramer};

use crate::state::SessionLink;

/// Read buffer size for the control socket.
const READ_BUF: usize = 4096;

/// Queue depth between callers and the write pump.
const WRITE_QUEUE: usize = 32;

/// Queue depth between the IO task and the framer task.
const CHUNK_QUEUE: usize = 64;

/// A command to write, answered once the bytes are on the socket.
pub(crate) struct WriteRequest {
    bytes: Bytes,
    reply: oneshot::Sender<Result<()>>,
}

/// Cloneable sender side of the write pump.
#[derive(Clone)]
pub(crate) struct CommandWriter {
    write_tx: mpsc::Sender<WriteRequest>,
}

impl CommandWriter {
    /// Queue `bytes` for the control socket and wait until written.
    pub(crate) async fn send(&self, bytes: Bytes) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::NotConnected),
        }
    }
}

/// Handles to a running control session's tasks.
pub(crate) struct ControlIo {
    writer: CommandWriter,
    io_task: JoinHandle<()>,
    framer_task: JoinHandle<()>,
}

impl ControlIo {
    pub(crate) fn writer(&self) -> CommandWriter {
        self.writer.clone()
    }

    /// Wait for both tasks to exit. The session token must be cancelled
    /// (or the stream ended) for this to return.
    pub(crate) async fn join(self) {
        let _ = self.io_task.await;
        let _ = self.framer_task.await;
    }
}

/// Spawn the IO and framer tasks for a freshly connected control socket.
pub(crate) fn spawn_control_io(
    socket: Box<dyn StreamSocket>,
    link: SessionLink,
    response_tx: mpsc::UnboundedSender<ControlItemMessage>,
    unsolicited_tx: broadcast::Sender<ControlItemMessage>,
) -> ControlIo {
    let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);

    let io_task = tokio::spawn(io_loop(socket, write_rx, chunk_tx, link.clone()));
    let framer_task = tokio::spawn(framer_loop(chunk_rx, response_tx, unsolicited_tx, link));

    ControlIo {
        writer: CommandWriter { write_tx },
        io_task,
        framer_task,
    }
}

/// Owns the control socket.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Pending writes
/// 3. Socket reads
async fn io_loop(
    mut socket: Box<dyn StreamSocket>,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    chunk_tx: mpsc::Sender<Bytes>,
    link: SessionLink,
) {
    debug!("control IO task started");
    let mut buf = vec![0u8; READ_BUF];

    let lost: Option<&'static str> = loop {
        tokio::select! {
            biased;

            _ = link.cancel.cancelled() => {
                debug!("control IO task cancelled");
                break None;
            }

            req = write_rx.recv() => match req {
                Some(WriteRequest { bytes, reply }) => {
                    trace!(bytes = bytes.len(), data = ?&bytes[..], "writing command");
                    let result = tokio::select! {
                        biased;
                        _ = link.cancel.cancelled() => {
                            debug!("control IO task cancelled during write");
                            let _ = reply.send(Err(Error::NotConnected));
                            break None;
                        }
                        result = socket.send(&bytes) => result,
                    };
                    let failed = result.is_err();
                    if let Err(e) = &result {
                        error!(error = %e, "control write failed");
                    }
                    let _ = reply.send(result);
                    if failed {
                        break Some("write failed");
                    }
                }
                None => {
                    debug!("all command writers dropped, exiting IO task");
                    break None;
                }
            },

            read = socket.receive(&mut buf) => match read {
                Ok(0) => break Some("peer closed the connection"),
                Ok(n) => {
                    trace!(bytes = n, "control bytes received");
                    if chunk_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break Some("framer task ended");
                    }
                }
                Err(e) => {
                    error!(error = %e, "control read failed");
                    break Some("read failed");
                }
            },
        }
    };

    if let Err(e) = socket.shutdown().await {
        warn!(error = %e, "control socket shutdown failed");
    }

    if let Some(reason) = lost {
        link.connection_lost(reason);
    }
    debug!("control IO task exited");
}

/// Reassembles messages from read chunks and routes them.
async fn framer_loop(
    mut chunk_rx: mpsc::Receiver<Bytes>,
    response_tx: mpsc::UnboundedSender<ControlItemMessage>,
    unsolicited_tx: broadcast::Sender<ControlItemMessage>,
    link: SessionLink,
) {
    let mut framer = ControlFramer::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => break,
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        for message in framer.push(&chunk) {
            route(message, &response_tx, &unsolicited_tx);
        }

        if framer.is_desynchronized() {
            link.connection_lost("control stream desynchronized");
            break;
        }
    }

    framer.finish();
    debug!("control framer task exited");
}

fn route(
    message: ControlItemMessage,
    response_tx: &mpsc::UnboundedSender<ControlItemMessage>,
    unsolicited_tx: &broadcast::Sender<ControlItemMessage>,
) {
    let route = framer::classify(&message);
    trace!(
        length = message.header.message_length,
        item = ?message.item_code,
        response_copies = route.response_copies,
        unsolicited = route.unsolicited,
        "control message classified"
    );

    if route.unsolicited {
        let _ = unsolicited_tx.send(message.clone());
    }
    for _ in 0..route.response_copies {
        let _ = response_tx.send(message.clone());
    }
}
