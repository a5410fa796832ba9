// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-blocking fd plumbing shared by the PTY master and the tmux FIFO.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

/// Owned stream fd registered with the tokio reactor via `AsyncFd`.
#[derive(Debug)]
pub struct StreamFd(pub OwnedFd);

impl AsRawFd for StreamFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for StreamFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Set the given file descriptor to non-blocking mode.
pub fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let raw = fd.as_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Wrap an owned fd for async use, switching it to non-blocking mode.
pub fn register(fd: OwnedFd) -> io::Result<AsyncFd<StreamFd>> {
    set_nonblocking(&fd)?;
    AsyncFd::new(StreamFd(fd))
}

/// Open a FIFO read-write and register it.
///
/// Holding a write end ourselves means the reader never sees EOF when the
/// external writer closes and reopens the pipe.
pub fn open_fifo(path: &Path) -> io::Result<AsyncFd<StreamFd>> {
    let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    register(file.into())
}

/// Read one chunk. `Ok(0)` means end of stream.
pub async fn read_chunk(afd: &AsyncFd<StreamFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| nix::unistd::read(inner, buf).map_err(io_err)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write all of `data`, waiting for writability as needed.
pub async fn write_all(afd: &AsyncFd<StreamFd>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| nix::unistd::write(inner, &data[offset..]).map_err(io_err)) {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

#[cfg(test)]
#[path = "nbio_tests.rs"]
mod tests;
