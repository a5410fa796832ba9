// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer input: payload write, settle pause, then a separate terminator.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::event::{BackendInput, Event};
use crate::hub::Hub;

/// Default pause between the payload and the terminator.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);

/// Terminator written after every accepted payload.
const SUBMIT: &[u8] = b"\r";

/// Inbound observer message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverMessage {
    Input { data: String },
}

/// Outcome of [`InputGateway::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Payload and terminator were written; carries the echoed text.
    Sent(String),
    /// Not an input message, or nothing left after trimming.
    Ignored,
}

/// Accepts observer commands and types them into the supervised program.
pub struct InputGateway {
    input_tx: mpsc::Sender<BackendInput>,
    hub: Arc<Hub>,
    settle: Duration,
    // Held across the whole payload/terminator pair.
    lock: Mutex<()>,
}

impl InputGateway {
    pub fn new(input_tx: mpsc::Sender<BackendInput>, hub: Arc<Hub>) -> Self {
        Self { input_tx, hub, settle: DEFAULT_SETTLE, lock: Mutex::new(()) }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Parse one raw observer message and, if it carries text, type it.
    ///
    /// Malformed or non-input messages are ignored. Fails with
    /// [`ErrorCode::Exited`] once the backend stops accepting input, and with
    /// [`ErrorCode::Internal`] when the backend reports a failed write. No echo
    /// is published in either case.
    pub async fn submit(&self, raw: &str) -> Result<Submission, ErrorCode> {
        let data = match serde_json::from_str::<ObserverMessage>(raw) {
            Ok(ObserverMessage::Input { data }) => data,
            Err(e) => {
                debug!("ignoring observer message: {e}");
                return Ok(Submission::Ignored);
            }
        };
        let text = data.trim();
        if text.is_empty() {
            return Ok(Submission::Ignored);
        }

        let _guard = self.lock.lock().await;
        self.write(Bytes::copy_from_slice(text.as_bytes())).await?;
        tokio::time::sleep(self.settle).await;
        self.write(Bytes::from_static(SUBMIT)).await?;

        self.hub.publish(Event::asked(text));
        Ok(Submission::Sent(text.to_owned()))
    }

    /// Write and wait until the backend has taken the bytes.
    async fn write(&self, data: Bytes) -> Result<(), ErrorCode> {
        self.input_tx.send(BackendInput::Write(data)).await.map_err(|_| ErrorCode::Exited)?;
        let (tx, rx) = oneshot::channel();
        self.input_tx.send(BackendInput::Drain(tx)).await.map_err(|_| ErrorCode::Exited)?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("input write failed: {e:#}");
                Err(ErrorCode::Internal)
            }
            Err(_) => Err(ErrorCode::Exited),
        }
    }
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;
