// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session supervisor: wires the backend, the output drain, and the hub
//! under one cancellation token.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::PatternTable;
use crate::event::{BackendInput, Origin, SessionState};
use crate::framer::OutputParser;
use crate::hub::Hub;
use crate::pty::{Backend, Boxed, ExitStatus, Teardown};

/// Live facts about the session, readable from transport handlers.
#[derive(Debug)]
pub struct SessionStatus {
    started_at: Instant,
    child_pid: AtomicU32,
    last_state: Mutex<Option<SessionState>>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            child_pid: AtomicU32::new(0),
            last_state: Mutex::new(None),
        }
    }

    /// PID of the supervised program, if known.
    pub fn child_pid(&self) -> Option<u32> {
        match self.child_pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Most recent state classified from program output.
    pub fn last_state(&self) -> Option<SessionState> {
        *self.last_state.lock()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Runtime objects for building a [`Session`].
pub struct SessionConfig {
    pub backend: Box<dyn Backend>,
    pub table: Arc<PatternTable>,
    pub hub: Arc<Hub>,
    pub status: Arc<SessionStatus>,
    pub cols: u16,
    pub rows: u16,
    pub shutdown: CancellationToken,
    /// How long to wait for the backend after teardown on cancellation.
    pub exit_grace: Duration,
}

impl SessionConfig {
    pub fn new(backend: impl Boxed, table: Arc<PatternTable>, hub: Arc<Hub>) -> Self {
        Self {
            backend: backend.boxed(),
            table,
            hub,
            status: Arc::new(SessionStatus::new()),
            cols: 80,
            rows: 24,
            shutdown: CancellationToken::new(),
            exit_grace: Duration::from_secs(5),
        }
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_status(mut self, status: Arc<SessionStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }
}

/// A running supervised program.
pub struct Session {
    input_tx: mpsc::Sender<BackendInput>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    shutdown: CancellationToken,
    teardown: Arc<Teardown>,
    exit_grace: Duration,
    backend_handle: JoinHandle<anyhow::Result<ExitStatus>>,
    drain_handle: JoinHandle<()>,
}

impl Session {
    /// Size the terminal, then spawn the backend and the output drain.
    pub fn start(config: SessionConfig) -> anyhow::Result<Self> {
        let SessionConfig { mut backend, table, hub, status, cols, rows, shutdown, exit_grace } =
            config;
        if cols == 0 || rows == 0 {
            anyhow::bail!("terminal size must be non-zero, got {cols}x{rows}");
        }

        if let Some(pid) = backend.child_pid() {
            status.child_pid.store(pid, Ordering::Release);
        }
        if let Err(e) = backend.resize(cols, rows) {
            debug!("initial resize failed: {e:#}");
        }
        let teardown = backend.teardown();

        let (output_tx, output_rx) = mpsc::channel(256);
        let (input_tx, input_rx) = mpsc::channel(256);
        let (resize_tx, resize_rx) = mpsc::channel(4);

        let backend_handle =
            tokio::spawn(async move { backend.run(output_tx, input_rx, resize_rx).await });
        let drain_handle = tokio::spawn(drain(output_rx, OutputParser::new(table), hub, status));

        Ok(Self { input_tx, resize_tx, shutdown, teardown, exit_grace, backend_handle, drain_handle })
    }

    /// Sender for the backend's write side.
    pub fn input_tx(&self) -> mpsc::Sender<BackendInput> {
        self.input_tx.clone()
    }

    /// Sender for terminal resizes.
    pub fn resize_tx(&self) -> mpsc::Sender<(u16, u16)> {
        self.resize_tx.clone()
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        if cols == 0 || rows == 0 {
            anyhow::bail!("terminal size must be non-zero, got {cols}x{rows}");
        }
        self.resize_tx
            .send((cols, rows))
            .await
            .map_err(|_| anyhow::anyhow!("backend is no longer running"))
    }

    /// Run until the program exits or the shutdown token is cancelled.
    ///
    /// Either way the backend is torn down exactly once, the token ends up
    /// cancelled, and every byte the backend produced has been published.
    pub async fn run(self) -> anyhow::Result<ExitStatus> {
        let Self { shutdown, teardown, exit_grace, mut backend_handle, drain_handle, .. } = self;

        let joined = tokio::select! {
            joined = &mut backend_handle => joined,
            _ = shutdown.cancelled() => {
                debug!("shutdown requested, tearing down backend");
                release(&teardown).await;
                match tokio::time::timeout(exit_grace, &mut backend_handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("backend did not stop within {exit_grace:?}, aborting");
                        backend_handle.abort();
                        Ok(Ok(ExitStatus::default()))
                    }
                }
            }
        };

        release(&teardown).await;
        shutdown.cancel();

        if let Err(e) = drain_handle.await {
            warn!("output drain task failed: {e}");
        }

        let status = joined.map_err(|e| anyhow::anyhow!("backend task failed: {e}"))??;
        debug!(code = ?status.code, signal = ?status.signal, "session ended");
        Ok(status)
    }
}

/// Run the teardown off the runtime; it may block while the child exits.
async fn release(teardown: &Arc<Teardown>) {
    let teardown = Arc::clone(teardown);
    if let Err(e) = tokio::task::spawn_blocking(move || teardown.run()).await {
        debug!("teardown task failed: {e}");
    }
}

/// The single reader of backend output: frame, classify, publish.
async fn drain(
    mut output_rx: mpsc::Receiver<Bytes>,
    mut parser: OutputParser,
    hub: Arc<Hub>,
    status: Arc<SessionStatus>,
) {
    while let Some(chunk) = output_rx.recv().await {
        for event in parser.feed(&chunk) {
            publish(&hub, &status, event);
        }
    }
    for event in parser.finish() {
        publish(&hub, &status, event);
    }
    debug!("backend output closed");
}

fn publish(hub: &Hub, status: &SessionStatus, event: crate::event::Event) {
    if let (Some(state), Origin::Supervised) = (event.state, event.origin) {
        *status.last_state.lock() = Some(state);
    }
    hub.publish(event);
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
