// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use nix::sys::stat::Mode;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::debug;

use super::nbio::{open_fifo, read_chunk, StreamFd};
use super::{find_program, Backend, ExitStatus, PendingWriteError, Teardown};
use crate::event::BackendInput;

/// How long to keep reading the FIFO after the pane dies, so output the pipe
/// was still carrying reaches observers.
const TAIL_DRAIN: Duration = Duration::from_millis(100);

/// A keystroke batch for `tmux send-keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keys {
    /// Sent with `-l` so tmux does not interpret key names.
    Literal(String),
    Enter,
}

/// Split written bytes into literal runs and Enter presses.
///
/// `\r\n` counts as a single Enter.
pub fn key_batches(text: &str) -> Vec<Keys> {
    let mut batches = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' | '\n' => {
                if !literal.is_empty() {
                    batches.push(Keys::Literal(std::mem::take(&mut literal)));
                }
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                batches.push(Keys::Enter);
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        batches.push(Keys::Literal(literal));
    }
    batches
}

/// Liveness of the pane as reported by `display-message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneStatus {
    Alive,
    Dead(ExitStatus),
}

/// Parse the output of `display-message -p '#{pane_dead} #{pane_dead_status}'`.
pub fn parse_pane_status(text: &str) -> Option<PaneStatus> {
    let mut fields = text.split_whitespace();
    match fields.next()? {
        "0" => Some(PaneStatus::Alive),
        "1" => {
            let code = fields.next().and_then(|s| s.parse().ok());
            Some(PaneStatus::Dead(ExitStatus { code, signal: None }))
        }
        _ => None,
    }
}

/// Backend that runs the program in a detached tmux session and tees the
/// pane's output through `pipe-pane` into a FIFO.
pub struct TmuxBackend {
    session: String,
    socket: Option<PathBuf>,
    fifo: AsyncFd<StreamFd>,
    poll_interval: Duration,
    teardown: Arc<Teardown>,
}

impl TmuxBackend {
    /// Start `command` in a new detached session named `session`.
    ///
    /// When `socket` is `Some`, every tmux invocation uses `-S <path>` to
    /// address an isolated server instead of the user's default.
    pub fn start(
        session: &str,
        command: &[String],
        cols: u16,
        rows: u16,
        socket: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let program = command.first().context("no command specified")?;
        find_program(program)?;

        match tmux_cmd(socket.as_deref()).arg("-V").stdout(Stdio::null()).status() {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("tmux is not installed or not in PATH")
            }
            Err(e) => return Err(anyhow::Error::new(e).context("failed to run tmux")),
        }

        let dir = tempfile::Builder::new().prefix("ampbridge-").tempdir()?;
        let fifo_path = dir.path().join("pane.fifo");
        nix::unistd::mkfifo(&fifo_path, Mode::from_bits_truncate(0o600))
            .with_context(|| format!("mkfifo {}", fifo_path.display()))?;
        let fifo = open_fifo(&fifo_path).context("open pane fifo")?;

        run_tmux(
            socket.as_deref(),
            &["new-session", "-d", "-s", session, "-x", &cols.to_string(), "-y", &rows.to_string()],
            command,
        )
        .with_context(|| format!("tmux new-session '{session}'"))?;

        let teardown = kill_session(session.to_owned(), socket.clone(), dir);

        let setup = run_tmux(
            socket.as_deref(),
            &["set-option", "-t", session, "remain-on-exit", "on"],
            &[],
        )
        .and_then(|()| {
            run_tmux(
                socket.as_deref(),
                &["pipe-pane", "-o", "-t", session, &pipe_command(&fifo_path)],
                &[],
            )
        });
        if let Err(e) = setup {
            teardown.run();
            return Err(e.context(format!("tmux pipe-pane '{session}'")));
        }

        debug!(session, fifo = %fifo_path.display(), "tmux session started");
        Ok(Self {
            session: session.to_owned(),
            socket,
            fifo,
            poll_interval: Duration::from_secs(1),
            teardown,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn tmux_async_cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        cmd
    }

    async fn pane_status(&self) -> Option<PaneStatus> {
        let out = self
            .tmux_async_cmd()
            .args(["display-message", "-p", "-t", &self.session])
            .arg("#{pane_dead} #{pane_dead_status}")
            .stdout(Stdio::piped())
            .output()
            .await
            .ok()?;
        if !out.status.success() {
            return None;
        }
        parse_pane_status(&String::from_utf8_lossy(&out.stdout))
    }

    async fn send_keys(&self, data: &[u8]) -> anyhow::Result<()> {
        let text = String::from_utf8_lossy(data);
        for batch in key_batches(&text) {
            let mut cmd = self.tmux_async_cmd();
            match batch {
                Keys::Literal(s) => cmd.args(["send-keys", "-l", "-t", &self.session, "--", &s]),
                Keys::Enter => cmd.args(["send-keys", "-t", &self.session, "Enter"]),
            };
            let status = cmd.status().await.context("tmux send-keys")?;
            if !status.success() {
                anyhow::bail!("tmux send-keys exited with {status}");
            }
        }
        Ok(())
    }

    /// Forward whatever the FIFO still holds, stopping once it goes quiet.
    async fn drain_tail(&self, buf: &mut [u8], output_tx: &mpsc::Sender<Bytes>) {
        while let Ok(Ok(n)) = tokio::time::timeout(TAIL_DRAIN, read_chunk(&self.fifo, buf)).await {
            if n == 0 || output_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                break;
            }
        }
    }
}

impl Backend for TmuxBackend {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<BackendInput>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>> {
        Box::pin(async move {
            let mut buf = vec![0u8; 8192];
            let mut interval = tokio::time::interval(self.poll_interval);
            let mut input_closed = false;
            let mut resize_closed = false;
            let mut write_error = PendingWriteError::default();

            let status = loop {
                tokio::select! {
                    result = read_chunk(&self.fifo, &mut buf) => {
                        match result {
                            Ok(0) => break ExitStatus::default(),
                            Ok(n) => {
                                let data = Bytes::copy_from_slice(&buf[..n]);
                                if output_tx.send(data).await.is_err() {
                                    break ExitStatus::default();
                                }
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    _ = interval.tick() => {
                        match self.pane_status().await {
                            Some(PaneStatus::Alive) => {}
                            Some(PaneStatus::Dead(status)) => {
                                self.drain_tail(&mut buf, &output_tx).await;
                                break status;
                            }
                            None => {
                                debug!(session = %self.session, "tmux session is gone");
                                break ExitStatus::default();
                            }
                        }
                    }
                    input = input_rx.recv(), if !input_closed => {
                        match input {
                            Some(BackendInput::Write(data)) => {
                                if let Err(e) = self.send_keys(&data).await {
                                    debug!("tmux input failed: {e:#}");
                                    write_error.record(e);
                                }
                            }
                            Some(BackendInput::Drain(tx)) => write_error.ack(tx),
                            None => input_closed = true,
                        }
                    }
                    resize = resize_rx.recv(), if !resize_closed => {
                        match resize {
                            Some((cols, rows)) => {
                                if let Err(e) = self.resize(cols, rows) {
                                    debug!("tmux resize failed: {e:#}");
                                }
                            }
                            None => resize_closed = true,
                        }
                    }
                }
            };
            Ok(status)
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        run_tmux(
            self.socket.as_deref(),
            &[
                "resize-window",
                "-t",
                &self.session,
                "-x",
                &cols.to_string(),
                "-y",
                &rows.to_string(),
            ],
            &[],
        )
    }

    fn child_pid(&self) -> Option<u32> {
        let output = tmux_cmd(self.socket.as_deref())
            .args(["display-message", "-p", "-t", &self.session, "#{pane_pid}"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }

    fn teardown(&self) -> Arc<Teardown> {
        Arc::clone(&self.teardown)
    }
}

impl Drop for TmuxBackend {
    fn drop(&mut self) {
        self.teardown.run();
    }
}

/// Shell command handed to `pipe-pane`.
fn pipe_command(fifo: &Path) -> String {
    let quoted = fifo.display().to_string().replace('\'', r"'\''");
    format!("exec cat >> '{quoted}'")
}

/// Kill the session and remove the FIFO directory.
fn kill_session(session: String, socket: Option<PathBuf>, dir: tempfile::TempDir) -> Arc<Teardown> {
    Teardown::new(move || {
        if let Err(e) = run_tmux(socket.as_deref(), &["kill-session", "-t", &session], &[]) {
            debug!("tmux kill-session '{session}' failed: {e:#}");
        }
        if let Err(e) = dir.close() {
            debug!("removing fifo directory failed: {e}");
        }
    })
}

/// Build a `std::process::Command` for tmux, prepending `-S <socket>` if set.
fn tmux_cmd(socket: Option<&Path>) -> std::process::Command {
    let mut cmd = std::process::Command::new("tmux");
    if let Some(s) = socket {
        cmd.arg("-S").arg(s);
    }
    cmd
}

fn run_tmux(socket: Option<&Path>, args: &[&str], trailing: &[String]) -> anyhow::Result<()> {
    let mut cmd = tmux_cmd(socket);
    cmd.args(args);
    if !trailing.is_empty() {
        cmd.arg("--").args(trailing);
    }
    let output = cmd.stdout(Stdio::null()).stderr(Stdio::piped()).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("tmux {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
#[path = "tmux_tests.rs"]
mod tests;
