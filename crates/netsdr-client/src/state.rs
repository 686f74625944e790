//! Lock-free client state shared between the client and its tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use netsdr_core::events::ClientEvent;
use netsdr_core::types::ClientState;

/// Atomic cell holding a [`ClientState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ClientState) -> Self {
        Self(AtomicU8::new(encode(state)))
    }

    pub(crate) fn get(&self) -> ClientState {
        decode(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: ClientState) {
        self.0.store(encode(state), Ordering::SeqCst);
    }

    /// Store `state` and return the previous one.
    pub(crate) fn swap(&self, state: ClientState) -> ClientState {
        decode(self.0.swap(encode(state), Ordering::SeqCst))
    }

    /// Move from `from` to `to`. Returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: ClientState, to: ClientState) -> bool {
        self.0
            .compare_exchange(encode(from), encode(to), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

fn encode(state: ClientState) -> u8 {
    match state {
        ClientState::Disconnected => 0,
        ClientState::Connecting => 1,
        ClientState::Connected => 2,
        ClientState::Streaming => 3,
    }
}

fn decode(raw: u8) -> ClientState {
    match raw {
        1 => ClientState::Connecting,
        2 => ClientState::Connected,
        3 => ClientState::Streaming,
        _ => ClientState::Disconnected,
    }
}

/// What a session's tasks need to report the connection ending on its own.
#[derive(Clone)]
pub(crate) struct SessionLink {
    pub(crate) cancel: CancellationToken,
    pub(crate) state: Arc<StateCell>,
    pub(crate) events: broadcast::Sender<ClientEvent>,
}

impl SessionLink {
    /// Mark the session dead after a peer close, socket error, or
    /// desynchronized stream. No-op once the session was cancelled.
    pub(crate) fn connection_lost(&self, reason: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        warn!(reason, "control connection lost");
        let previous = self.state.swap(ClientState::Disconnected);
        self.cancel.cancel();
        if previous.accepts_commands() {
            let _ = self.events.send(ClientEvent::ConnectionLost);
        }
    }
}
