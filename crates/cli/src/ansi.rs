// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Escape-sequence stripping for pattern matching.
//!
//! CSI, OSC and string controls, charset designations and two-byte escapes
//! are removed, along with C0 controls other than newline. Printable
//! text passes through unchanged. Truncated sequences at the end of the
//! input are dropped.

/// Return `text` with terminal escape sequences and control bytes removed.
pub fn strip(text: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(text)).into_owned()
}

#[cfg(test)]
#[path = "ansi_tests.rs"]
mod tests;
