// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Classified state of the supervised program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Asking,
    Thinking,
    RunningCommand,
    Output,
    Idle,
    Quitting,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        Self::Asking,
        Self::Thinking,
        Self::RunningCommand,
        Self::Output,
        Self::Idle,
        Self::Quitting,
    ];

    /// Wire-format name (e.g. `"RunningCommand"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asking => "Asking",
            Self::Thinking => "Thinking",
            Self::RunningCommand => "RunningCommand",
            Self::Output => "Output",
            Self::Idle => "Idle",
            Self::Quitting => "Quitting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "amp")]
    Supervised,
    #[serde(rename = "client")]
    Observer,
}

/// A single message fanned out to observers.
///
/// Serializes to the observer wire format:
/// `{"state": "Idle", "line": "...", "ts": 1700000000000, "from": "amp"}`.
/// `state` is absent for raw-line relay; `line` is absent when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub line: String,
    pub ts: i64,
    #[serde(rename = "from")]
    pub origin: Origin,
}

impl Event {
    /// A classified state transition from the supervised program.
    pub fn state(state: SessionState, line: impl Into<String>) -> Self {
        Self { state: Some(state), line: line.into(), ts: now_ms(), origin: Origin::Supervised }
    }

    /// A raw output line relayed without classification.
    pub fn raw(line: impl Into<String>) -> Self {
        Self { state: None, line: line.into(), ts: now_ms(), origin: Origin::Supervised }
    }

    /// Echo of text an observer submitted.
    pub fn asked(line: impl Into<String>) -> Self {
        Self {
            state: Some(SessionState::Asking),
            line: line.into(),
            ts: now_ms(),
            origin: Origin::Observer,
        }
    }

    /// Synthetic greeting sent to each observer as it connects.
    pub fn greeting() -> Self {
        Self {
            state: Some(SessionState::Idle),
            line: String::new(),
            ts: now_ms(),
            origin: Origin::Supervised,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.state.is_none()
    }
}

/// Input sent to the backend's write side.
#[derive(Debug)]
pub enum BackendInput {
    Write(Bytes),
    /// Acknowledged once every earlier write has been handed to the backend.
    /// The ack carries the first write failure since the previous drain.
    Drain(tokio::sync::oneshot::Sender<anyhow::Result<()>>),
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
