//! Command/response correlation.
//!
//! The receiver answers a command by echoing it (ACK) or with a bare header
//! (NAK). There is no request identifier on the wire, so the next message on
//! the response channel is taken as the answer to the command just sent.
//! Only one wait may be outstanding at a time.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use netsdr_core::error::{Error, Result};
use netsdr_core::types::ControlItemMessage;

/// Timed reader of the response channel.
pub struct Correlator {
    responses: Mutex<mpsc::UnboundedReceiver<ControlItemMessage>>,
}

impl Correlator {
    pub fn new(responses: mpsc::UnboundedReceiver<ControlItemMessage>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }

    /// Wait for the next response-channel message.
    ///
    /// Fails with [`Error::Timeout`] if nothing arrives within `timeout`, or
    /// [`Error::ConnectionLost`] once the control stream has ended and the
    /// channel is drained. A timeout fails only this call.
    pub async fn await_next(&self, timeout: Duration) -> Result<ControlItemMessage> {
        let wait = async {
            let mut responses = self.responses.lock().await;
            responses.recv().await
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(Error::ConnectionLost),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Drop every message already queued. Returns how many were dropped.
    pub async fn discard_pending(&self) -> usize {
        let mut responses = self.responses.lock().await;
        let mut dropped = 0;
        while responses.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
