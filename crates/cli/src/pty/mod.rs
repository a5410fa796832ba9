// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod nbio;
pub mod spawn;
pub mod teardown;
pub mod tmux;

pub use teardown::Teardown;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::event::BackendInput;

/// Exit status of the supervised program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Process exit code to mirror: the program's own code, `128 + signal`
    /// when it was killed, or 1 when neither is known.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }
}

/// First write failure since the last drain, reported with the next ack.
#[derive(Debug, Default)]
pub struct PendingWriteError(Option<anyhow::Error>);

impl PendingWriteError {
    /// Remember `err` unless an earlier failure is still unreported.
    pub fn record(&mut self, err: anyhow::Error) {
        if self.0.is_none() {
            self.0 = Some(err);
        }
    }

    /// Answer a drain with the pending failure, if any, and clear it.
    pub fn ack(&mut self, tx: oneshot::Sender<anyhow::Result<()>>) {
        let _ = tx.send(self.0.take().map_or(Ok(()), Err));
    }
}

/// Raw duplex stream to the supervised program.
///
/// `run` reads program output into `output_tx` and applies writes and
/// resizes until the program is gone. Object-safe for use as
/// `Box<dyn Backend>`.
pub trait Backend: Send + 'static {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<BackendInput>,
        resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn child_pid(&self) -> Option<u32>;

    /// Handle that releases the underlying process or session. Running it
    /// also unblocks a pending read in `run`.
    fn teardown(&self) -> Arc<Teardown>;
}

/// Conversion trait so both concrete backends and `Box<dyn Backend>`
/// can be passed to [`crate::session::SessionConfig`] without explicit boxing.
pub trait Boxed {
    fn boxed(self) -> Box<dyn Backend>;
}

impl<T: Backend> Boxed for T {
    fn boxed(self) -> Box<dyn Backend> {
        Box::new(self)
    }
}

impl Boxed for Box<dyn Backend> {
    fn boxed(self) -> Box<dyn Backend> {
        self
    }
}

/// Resolve `program` to an executable path, searching `PATH` when it has no
/// directory component.
pub fn find_program(program: &str) -> anyhow::Result<PathBuf> {
    if program.is_empty() {
        anyhow::bail!("no program specified");
    }
    if program.contains('/') {
        let path = Path::new(program);
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("{program} is not an executable file");
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| anyhow::anyhow!("{program} not found in PATH"))
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && nix::unistd::access(path, nix::unistd::AccessFlags::X_OK).is_ok()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
