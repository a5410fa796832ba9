// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::debug;

use super::nbio::{read_chunk, register, write_all, StreamFd};
use super::{find_program, Backend, ExitStatus, Teardown};
use crate::event::BackendInput;

/// How long the process group gets after SIGHUP before SIGKILL.
const HANGUP_GRACE: Duration = Duration::from_millis(500);

/// Direct pseudoterminal backend: the program runs as a `forkpty` child.
pub struct NativePty {
    master: AsyncFd<StreamFd>,
    child_pid: Pid,
    reaped: Arc<AtomicBool>,
    teardown: Arc<Teardown>,
}

impl NativePty {
    /// Spawn `command` on a new PTY of the given size.
    ///
    /// The program is resolved before forking, so a missing executable is
    /// reported here rather than as an immediate child exit.
    pub fn spawn(
        command: &[String],
        cols: u16,
        rows: u16,
        extra_env: &[(String, String)],
    ) -> anyhow::Result<Self> {
        Self::spawn_with_reap_interval(command, cols, rows, extra_env, Duration::from_millis(50))
    }

    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn_with_reap_interval(
        command: &[String],
        cols: u16,
        rows: u16,
        extra_env: &[(String, String)],
        reap_interval: Duration,
    ) -> anyhow::Result<Self> {
        let program = command.first().context("no command specified")?;
        let program = find_program(program)?;

        let c_program = CString::new(program.to_string_lossy().as_bytes())
            .context("invalid program path")?;
        let c_args: Vec<CString> = command
            .iter()
            .map(|s| CString::new(s.as_bytes()))
            .collect::<Result<_, _>>()
            .context("invalid command argument")?;

        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                // SAFETY: restoring the default SIGPIPE disposition in the
                // post-fork child before exec; tokio leaves it ignored.
                unsafe {
                    let _ = nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
                }
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("AMPBRIDGE", "1");
                for (key, val) in extra_env {
                    std::env::set_var(key, val);
                }

                let _ = execvp(&c_program, &c_args);
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => {
                let master = register(master).context("register pty master")?;
                let reaped = Arc::new(AtomicBool::new(false));
                let teardown = hangup_group(child, Arc::clone(&reaped), reap_interval);
                Ok(Self { master, child_pid: child, reaped, teardown })
            }
        }
    }
}

/// SIGHUP the child's process group, escalating to SIGKILL if the child has
/// not been reaped within [`HANGUP_GRACE`].
fn hangup_group(child: Pid, reaped: Arc<AtomicBool>, reap_interval: Duration) -> Arc<Teardown> {
    Teardown::new(move || {
        // forkpty places the child in a new session, so its PID is also the
        // process group ID.
        let pgid = Pid::from_raw(-child.as_raw());
        if reaped.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = kill(pgid, Signal::SIGHUP) {
            debug!("SIGHUP to process group {child} failed: {e}");
            return;
        }

        let iterations = (HANGUP_GRACE.as_millis() / reap_interval.as_millis().max(1)) as usize;
        for _ in 0..iterations.max(1) {
            if reaped.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(reap_interval);
        }
        if !reaped.load(Ordering::Acquire) {
            debug!("process group {child} ignored SIGHUP, sending SIGKILL");
            let _ = kill(pgid, Signal::SIGKILL);
        }
    })
}

impl Backend for NativePty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<BackendInput>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>
    {
        let pid = self.child_pid;
        let reaped = Arc::clone(&self.reaped);
        Box::pin(async move {
            let mut buf = vec![0u8; 8192];
            let mut input_closed = false;
            let mut resize_closed = false;

            loop {
                tokio::select! {
                    result = read_chunk(&self.master, &mut buf) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => {
                                let data = Bytes::copy_from_slice(&buf[..n]);
                                if output_tx.send(data).await.is_err() {
                                    break;
                                }
                            }
                            // The slave side closed: the child exited.
                            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    input = input_rx.recv(), if !input_closed => {
                        match input {
                            Some(BackendInput::Write(data)) => {
                                if let Err(e) = write_all(&self.master, &data).await {
                                    if e.raw_os_error() == Some(libc::EIO) {
                                        break;
                                    }
                                    return Err(e.into());
                                }
                            }
                            Some(BackendInput::Drain(tx)) => {
                                let _ = tx.send(Ok(()));
                            }
                            None => input_closed = true,
                        }
                    }
                    resize = resize_rx.recv(), if !resize_closed => {
                        match resize {
                            Some((cols, rows)) => {
                                if let Err(e) = self.resize(cols, rows) {
                                    debug!("pty resize failed: {e:#}");
                                }
                            }
                            None => resize_closed = true,
                        }
                    }
                }
            }

            // Reap on a blocking thread to avoid stalling the runtime.
            let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
                .await
                .context("join wait thread")??;
            reaped.store(true, Ordering::Release);
            Ok(status)
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws =
            rustix::termios::Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        rustix::termios::tcsetwinsize(self.master.get_ref(), ws)
            .context("TIOCSWINSZ ioctl failed")?;
        Ok(())
    }

    fn child_pid(&self) -> Option<u32> {
        Some(self.child_pid.as_raw() as u32)
    }

    fn teardown(&self) -> Arc<Teardown> {
        Arc::clone(&self.teardown)
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        self.teardown.run();
    }
}

/// Block until the child exits and convert to [`ExitStatus`].
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            // Someone else already collected it.
            Err(nix::errno::Errno::ECHILD) => return Ok(ExitStatus::default()),
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
