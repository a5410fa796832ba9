// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level bridge runner, shared by `main` and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::classify::PatternTable;
use crate::config::{AttachMode, Config};
use crate::hub::Hub;
use crate::input::InputGateway;
use crate::pty::spawn::NativePty;
use crate::pty::tmux::TmuxBackend;
use crate::pty::{Backend, ExitStatus};
use crate::session::{Session, SessionConfig, SessionStatus};
use crate::transport::{build_router, AppState};

/// Result of a completed session.
pub struct RunResult {
    pub status: ExitStatus,
    pub app_state: Arc<AppState>,
}

/// A started bridge: the program is running and the server is listening.
///
/// Returned by [`prepare`] so callers (e.g. integration tests) can reach the
/// bound address and [`AppState`] before awaiting the session.
pub struct PreparedSession {
    pub app_state: Arc<AppState>,
    pub addr: SocketAddr,
    session: Session,
    server: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl PreparedSession {
    /// Run until the program exits or shutdown is requested, then stop the
    /// server within the shutdown timeout.
    pub async fn run(self) -> anyhow::Result<RunResult> {
        let Self { app_state, session, mut server, shutdown_timeout, .. } = self;

        let result = session.run().await;
        app_state.shutdown.cancel();

        if tokio::time::timeout(shutdown_timeout, &mut server).await.is_err() {
            warn!("server did not stop within {shutdown_timeout:?}, aborting");
            server.abort();
        }

        Ok(RunResult { status: result?, app_state })
    }
}

/// Run the bridge to completion.
pub async fn run(config: Config) -> anyhow::Result<RunResult> {
    prepare(config).await?.run().await
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Load the pattern table, bind the listener, start the program, and serve.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedSession> {
    init_tracing(&config);

    let table = match config.patterns {
        Some(ref path) => PatternTable::load(path)
            .with_context(|| format!("loading patterns from {}", path.display()))?,
        None => PatternTable::builtin()?,
    };

    // Bind before spawning so a busy port leaves nothing running.
    let bind = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind).await.with_context(|| format!("binding {bind}"))?;
    let addr = listener.local_addr()?;

    let command = config.command_line();
    let backend = build_backend(&config, &command)?;

    let shutdown = CancellationToken::new();
    let hub = Arc::new(Hub::new());
    let status = Arc::new(SessionStatus::new());
    let session = Session::start(
        SessionConfig::new(backend, Arc::new(table), Arc::clone(&hub))
            .with_size(config.cols, config.rows)
            .with_status(Arc::clone(&status))
            .with_shutdown(shutdown.clone())
            .with_exit_grace(config.shutdown_timeout()),
    )?;
    info!(command = ?command, pid = ?status.child_pid(), "program started");

    let gateway =
        InputGateway::new(session.input_tx(), Arc::clone(&hub)).with_settle(config.settle_delay());
    let app_state = Arc::new(AppState {
        hub,
        gateway: Arc::new(gateway),
        resize_tx: session.resize_tx(),
        status,
        shutdown: shutdown.clone(),
    });

    let router = build_router(Arc::clone(&app_state));
    info!("HTTP listening on {addr}");
    let sd = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        if let Err(e) = result {
            error!("HTTP server error: {e}");
        }
    });

    spawn_signal_handler(shutdown);

    Ok(PreparedSession {
        app_state,
        addr,
        session,
        server,
        shutdown_timeout: config.shutdown_timeout(),
    })
}

fn build_backend(config: &Config, command: &[String]) -> anyhow::Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match config.attach_mode()? {
        AttachMode::Pty => Box::new(NativePty::spawn_with_reap_interval(
            command,
            config.cols,
            config.rows,
            &[],
            config.reap_poll(),
        )?),
        AttachMode::Tmux => {
            let name = config.tmux_session_name();
            info!(session = %name, "starting tmux session");
            Box::new(
                TmuxBackend::start(&name, command, config.cols, config.rows, config.tmux_socket.clone())?
                    .with_poll_interval(config.tmux_poll()),
            )
        }
    };
    Ok(backend)
}

/// Cancel `shutdown` on the first SIGTERM or SIGINT.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                shutdown.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    });
}
