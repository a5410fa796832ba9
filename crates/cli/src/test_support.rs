// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fake backend, state builders, helpers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::BackendInput;
use crate::hub::Hub;
use crate::input::InputGateway;
use crate::pty::{Backend, ExitStatus, PendingWriteError, Teardown};
use crate::session::SessionStatus;
use crate::transport::AppState;

/// Writes seen by a fake backend, with the instant each arrived.
pub type RecordedWrites = Arc<Mutex<Vec<(Instant, Bytes)>>>;

/// Record every write on `input_rx` and acknowledge every drain.
pub fn spawn_input_recorder(mut input_rx: mpsc::Receiver<BackendInput>) -> RecordedWrites {
    let writes: RecordedWrites = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&writes);
    tokio::spawn(async move {
        while let Some(input) = input_rx.recv().await {
            match input {
                BackendInput::Write(data) => sink.lock().push((Instant::now(), data)),
                BackendInput::Drain(tx) => {
                    let _ = tx.send(Ok(()));
                }
            }
        }
    });
    writes
}

/// A scripted backend for deterministic session tests.
///
/// Emits its output chunks, then either exits at once or, when held open,
/// keeps accepting input until its teardown runs.
pub struct FakeBackend {
    output: Vec<Bytes>,
    chunk_delay: Duration,
    exit_status: ExitStatus,
    hold_open: bool,
    fail_writes: bool,
    child_pid: Option<u32>,
    writes: RecordedWrites,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    teardowns: Arc<AtomicUsize>,
    released: CancellationToken,
    teardown: Arc<Teardown>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let released = CancellationToken::new();
        let teardown = {
            let teardowns = Arc::clone(&teardowns);
            let released = released.clone();
            Teardown::new(move || {
                teardowns.fetch_add(1, Ordering::SeqCst);
                released.cancel();
            })
        };
        Self {
            output: Vec::new(),
            chunk_delay: Duration::ZERO,
            exit_status: ExitStatus { code: Some(0), signal: None },
            hold_open: false,
            fail_writes: false,
            child_pid: None,
            writes: Arc::new(Mutex::new(Vec::new())),
            resizes: Arc::new(Mutex::new(Vec::new())),
            teardowns,
            released,
            teardown,
        }
    }

    pub fn with_output<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self { output: chunks.into_iter().map(Into::into).collect(), ..Self::new() }
    }

    pub fn exit_status(mut self, s: ExitStatus) -> Self {
        self.exit_status = s;
        self
    }

    pub fn chunk_delay(mut self, d: Duration) -> Self {
        self.chunk_delay = d;
        self
    }

    /// Keep running after the scripted output until torn down.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Reject every write, reporting the failure on the next drain.
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn child_pid(mut self, pid: u32) -> Self {
        self.child_pid = Some(pid);
        self
    }

    pub fn writes(&self) -> RecordedWrites {
        Arc::clone(&self.writes)
    }

    pub fn resizes(&self) -> Arc<Mutex<Vec<(u16, u16)>>> {
        Arc::clone(&self.resizes)
    }

    /// How many times the teardown action actually ran.
    pub fn teardown_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.teardowns)
    }
}

impl Backend for FakeBackend {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<BackendInput>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>> {
        let output = std::mem::take(&mut self.output);
        Box::pin(async move {
            for chunk in output {
                if output_tx.send(chunk).await.is_err() {
                    break;
                }
                if self.chunk_delay > Duration::ZERO {
                    tokio::time::sleep(self.chunk_delay).await;
                }
            }
            if !self.hold_open {
                return Ok(self.exit_status);
            }

            let mut input_closed = false;
            let mut resize_closed = false;
            let mut write_error = PendingWriteError::default();
            loop {
                tokio::select! {
                    _ = self.released.cancelled() => break,
                    input = input_rx.recv(), if !input_closed => match input {
                        Some(BackendInput::Write(data)) => {
                            if self.fail_writes {
                                write_error.record(anyhow::anyhow!("write rejected"));
                            } else {
                                self.writes.lock().push((Instant::now(), data));
                            }
                        }
                        Some(BackendInput::Drain(tx)) => write_error.ack(tx),
                        None => input_closed = true,
                    },
                    resize = resize_rx.recv(), if !resize_closed => match resize {
                        Some(size) => self.resizes.lock().push(size),
                        None => resize_closed = true,
                    },
                }
            }
            Ok(self.exit_status)
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    fn child_pid(&self) -> Option<u32> {
        self.child_pid
    }

    fn teardown(&self) -> Arc<Teardown> {
        Arc::clone(&self.teardown)
    }
}

/// Transport state wired to in-memory channels instead of a session.
pub struct TestState {
    pub state: Arc<AppState>,
    pub writes: RecordedWrites,
    pub resize_rx: mpsc::Receiver<(u16, u16)>,
}

/// Build an [`AppState`] whose backend input is recorded and acknowledged.
pub fn test_state() -> TestState {
    let hub = Arc::new(Hub::new());
    let (input_tx, input_rx) = mpsc::channel(64);
    let (resize_tx, resize_rx) = mpsc::channel(4);
    let writes = spawn_input_recorder(input_rx);
    let gateway = InputGateway::new(input_tx, Arc::clone(&hub)).with_settle(Duration::ZERO);
    let state = Arc::new(AppState {
        hub,
        gateway: Arc::new(gateway),
        resize_tx,
        status: Arc::new(SessionStatus::new()),
        shutdown: CancellationToken::new(),
    });
    TestState { state, writes, resize_rx }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Spawn an HTTP server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
