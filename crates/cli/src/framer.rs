// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heuristic line framing for redraw-heavy terminal output.
//!
//! The supervised program repaints its screen with cursor movement rather
//! than line breaks, so a unit ends on `\n`, `\r`, or when the buffer ends in
//! a redraw escape (cursor up, cursor to column, clear line, clear to end,
//! cursor show/hide). A buffer that already matches a `Thinking` or
//! `RunningCommand` rule is emitted at once, before the next redraw escape
//! can swallow it. That check runs only after a `.`, `:` or a completed
//! non-ASCII character; an undelimited buffer is capped at a char boundary.

use std::sync::Arc;

use crate::ansi;
use crate::classify::{PatternTable, StateTracker};
use crate::event::Event;

/// Default cap on an undelimited buffer.
pub const DEFAULT_MAX_UNIT: usize = 16 * 1024;

/// One framed chunk of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Text as received, escapes included.
    pub raw: String,
    /// Escape-stripped, trimmed text used for classification.
    pub text: String,
}

/// Byte-at-a-time framer. Owns the pending buffer exclusively.
#[derive(Debug)]
pub struct LineFramer {
    table: Arc<PatternTable>,
    buf: Vec<u8>,
    max_len: usize,
}

impl LineFramer {
    pub fn new(table: Arc<PatternTable>) -> Self {
        Self { table, buf: Vec::with_capacity(1024), max_len: DEFAULT_MAX_UNIT }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Bytes received since the last unit boundary.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Consume one byte, returning a unit if it closed one.
    pub fn push(&mut self, byte: u8) -> Option<Unit> {
        if byte == b'\n' || byte == b'\r' {
            return self.flush();
        }
        self.buf.push(byte);

        if ends_with_redraw(&self.buf) {
            return self.flush();
        }
        if self.buf.len() >= self.max_len {
            let end = complete_prefix_len(&self.buf);
            return self.flush_prefix(if end == 0 { self.buf.len() } else { end });
        }
        if self.may_end_urgent(byte) && self.matches_urgent() {
            return self.flush();
        }
        None
    }

    /// Consume a chunk, returning every unit it closed in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Unit> {
        chunk.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Close the pending buffer. Blank units are discarded.
    pub fn flush(&mut self) -> Option<Unit> {
        self.flush_prefix(self.buf.len())
    }

    /// Close the first `end` bytes as a unit, keeping the rest pending.
    fn flush_prefix(&mut self, end: usize) -> Option<Unit> {
        let raw: Vec<u8> = self.buf.drain(..end).collect();
        let raw = String::from_utf8_lossy(&raw).into_owned();
        let text = ansi::strip(&raw).trim().to_owned();
        if text.is_empty() {
            return None;
        }
        Some(Unit { raw, text })
    }

    /// Urgent rules end in `.`, `:` or a non-ASCII mark such as `\u{2026}`,
    /// so only those bytes can complete a new match.
    fn may_end_urgent(&self, byte: u8) -> bool {
        matches!(byte, b'.' | b':')
            || (!byte.is_ascii() && complete_prefix_len(&self.buf) == self.buf.len())
    }

    fn matches_urgent(&self) -> bool {
        let text = match std::str::from_utf8(&self.buf) {
            Ok(text) => text,
            Err(e) => match std::str::from_utf8(&self.buf[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            },
        };
        self.table.matches_urgent(text)
    }
}

/// Length of `buf` without a trailing, incomplete UTF-8 sequence.
fn complete_prefix_len(buf: &[u8]) -> usize {
    let floor = buf.len().saturating_sub(4);
    for i in (floor..buf.len()).rev() {
        let width = match buf[i] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if i + width > buf.len() { i } else { buf.len() };
    }
    buf.len()
}

/// Whether `buf` ends in one of the redraw escapes that delimit a unit.
pub fn ends_with_redraw(buf: &[u8]) -> bool {
    let Some((&last, rest)) = buf.split_last() else {
        return false;
    };
    if !matches!(last, b'A' | b'G' | b'K' | b'J' | b'h' | b'l') {
        return false;
    }

    let params_start =
        rest.iter().rposition(|b| !b.is_ascii_digit() && *b != b'?').map_or(0, |i| i + 1);
    if !rest[..params_start].ends_with(b"\x1b[") {
        return false;
    }
    let params = &rest[params_start..];

    match last {
        b'h' | b'l' => params == b"?25",
        b'K' => matches!(params, b"" | b"0" | b"1" | b"2"),
        b'J' => matches!(params, b"" | b"0"),
        _ => !params.contains(&b'?'),
    }
}

/// Framer plus classifier: turns output chunks into observer events.
///
/// Every non-blank unit yields a raw-line event; a state event follows only
/// when the classified state changed.
#[derive(Debug)]
pub struct OutputParser {
    table: Arc<PatternTable>,
    framer: LineFramer,
    tracker: StateTracker,
}

impl OutputParser {
    pub fn new(table: Arc<PatternTable>) -> Self {
        let framer = LineFramer::new(Arc::clone(&table));
        Self { table, framer, tracker: StateTracker::new() }
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        let units = self.framer.feed(chunk);
        self.events_for(units)
    }

    /// Flush whatever is pending (used at end of stream).
    pub fn finish(&mut self) -> Vec<Event> {
        let units = self.framer.flush().into_iter().collect();
        self.events_for(units)
    }

    fn events_for(&mut self, units: Vec<Unit>) -> Vec<Event> {
        let mut events = Vec::with_capacity(units.len());
        for unit in units {
            let state = self.tracker.observe(&self.table, &unit.text);
            events.push(Event::raw(unit.raw));
            if let Some(state) = state {
                events.push(Event::state(state, unit.text));
            }
        }
        events
    }
}

#[cfg(test)]
#[path = "framer_tests.rs"]
mod tests;
