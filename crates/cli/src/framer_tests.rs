// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::classify::{classify, PatternTable};
use crate::event::{Origin, SessionState};

fn table() -> anyhow::Result<Arc<PatternTable>> {
    Ok(Arc::new(PatternTable::builtin()?))
}

fn texts(units: &[Unit]) -> Vec<&str> {
    units.iter().map(|u| u.text.as_str()).collect()
}

fn states(events: &[Event]) -> Vec<SessionState> {
    events.iter().filter_map(|e| e.state).collect()
}

#[test]
fn newline_closes_prompt_unit() -> anyhow::Result<()> {
    let table = table()?;
    let mut framer = LineFramer::new(Arc::clone(&table));
    let units = framer.feed(b"> hello\n");
    assert_eq!(texts(&units), vec!["> hello"]);
    assert_eq!(classify(&table, &units[0].text, None), Some(SessionState::Asking));
    Ok(())
}

#[test]
fn thinking_emits_before_trailing_escape() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    let input = "\u{25c9} Thinking...\x1b[2A".as_bytes();
    let split = input.len() - "\x1b[2A".len();

    // The unit closes on the final '.', before any escape byte arrives.
    let units = framer.feed(&input[..split]);
    assert_eq!(texts(&units), vec!["\u{25c9} Thinking..."]);
    assert!(framer.pending().is_empty());

    // The trailing redraw is blank once stripped and is dropped.
    assert!(framer.feed(&input[split..]).is_empty());
    Ok(())
}

#[test]
fn running_command_emits_immediately_with_escapes() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    let units = framer.feed(b"\x1b[33mRunning command...");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].raw, "\x1b[33mRunning command...");
    assert_eq!(units[0].text, "Running command...");
    Ok(())
}

#[yare::parameterized(
    cursor_up = { "\x1b[A" },
    cursor_up_n = { "\x1b[12A" },
    cursor_to_column = { "\x1b[1G" },
    clear_line = { "\x1b[2K" },
    clear_line_right = { "\x1b[K" },
    clear_to_end = { "\x1b[J" },
    clear_to_end_zero = { "\x1b[0J" },
    show_cursor = { "\x1b[?25h" },
    hide_cursor = { "\x1b[?25l" },
)]
fn redraw_escape_delimits(escape: &str) {
    let mut framer = LineFramer::new(table().expect("builtin table"));
    let units = framer.feed(format!("partial reply{escape}").as_bytes());
    assert_eq!(texts(&units), vec!["partial reply"]);
    assert!(framer.pending().is_empty());
}

#[yare::parameterized(
    sgr = { "\x1b[1m" },
    cursor_down = { "\x1b[2B" },
    home = { "\x1b[H" },
    bracketed_paste = { "\x1b[?2004h" },
    clear_screen = { "\x1b[2J" },
)]
fn other_escapes_do_not_delimit(escape: &str) {
    let mut framer = LineFramer::new(table().expect("builtin table"));
    assert!(framer.feed(format!("partial reply{escape}").as_bytes()).is_empty());
    assert!(!framer.pending().is_empty());
}

#[test]
fn blank_units_are_discarded() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    assert!(framer.feed(b"   \r\n\x1b[2K\x1b[1G\n\t\n").is_empty());
    assert!(framer.pending().is_empty());
    Ok(())
}

#[test]
fn crlf_yields_one_unit_per_line() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    let units = framer.feed(b"first\r\nsecond\r\n");
    assert_eq!(texts(&units), vec!["first", "second"]);
    Ok(())
}

#[test]
fn split_utf8_reassembles() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    let bytes = "\u{276f} caf\u{e9}\n".as_bytes();
    let mut units = Vec::new();
    for chunk in bytes.chunks(1) {
        units.extend(framer.feed(chunk));
    }
    assert_eq!(texts(&units), vec!["\u{276f} caf\u{e9}"]);
    Ok(())
}

#[test]
fn oversized_buffer_is_flushed() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?).with_max_len(8);
    let units = framer.feed(b"abcdefghij");
    assert_eq!(texts(&units), vec!["abcdefgh"]);
    assert_eq!(framer.pending(), b"ij");
    Ok(())
}

#[test]
fn oversized_buffer_keeps_multibyte_char_whole() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?).with_max_len(8);
    // "abcdef" plus the first two bytes of U+2026 reaches the cap mid-char.
    let units = framer.feed("abcdef\u{2026}gh".as_bytes());
    assert_eq!(texts(&units), vec!["abcdef"]);
    assert!(units.iter().all(|u| !u.raw.contains('\u{fffd}')));
    assert_eq!(framer.pending(), "\u{2026}gh".as_bytes());
    Ok(())
}

#[test]
fn urgent_match_waits_for_a_terminator() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    assert!(framer.feed(b"Running command").is_empty());
    let units = framer.feed(b":");
    assert_eq!(texts(&units), vec!["Running command:"]);

    let units = framer.feed("Preparing\u{2026}".as_bytes());
    assert_eq!(texts(&units), vec!["Preparing\u{2026}"]);
    Ok(())
}

#[test]
fn incomplete_char_after_urgent_match_stays_pending() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?);
    let bytes = "Thinking...\u{25c9}".as_bytes();
    // The '.' closes the unit; the partial mark after it stays pending.
    let units = framer.feed(&bytes[..bytes.len() - 1]);
    assert_eq!(texts(&units), vec!["Thinking..."]);
    assert_eq!(framer.pending(), &bytes[11..bytes.len() - 1]);
    Ok(())
}

#[test]
fn cursor_positioning_repaint_stays_bounded() -> anyhow::Result<()> {
    let mut framer = LineFramer::new(table()?).with_max_len(4096);
    let mut stream = Vec::new();
    for row in 1..=2000 {
        let line = row % 50 + 1;
        stream.extend_from_slice(format!("\x1b[{line};1Hcell {row} of the grid").as_bytes());
    }

    let units = framer.feed(&stream);
    assert!(!units.is_empty());
    assert!(units.iter().all(|u| u.raw.len() <= 4096));
    let framed: usize = units.iter().map(|u| u.raw.len()).sum();
    assert_eq!(framed + framer.pending().len(), stream.len());
    Ok(())
}

#[yare::parameterized(
    empty = { b"", false },
    bare_letter = { b"A", false },
    no_csi = { b"x[2A", false },
    private_cursor_up = { b"\x1b[?2A", false },
    clear_line_three = { b"\x1b[3K", false },
    other_private_mode = { b"\x1b[?1049h", false },
    cursor_up = { b"text\x1b[2A", true },
    hide = { b"\x1b[?25l", true },
)]
fn redraw_catalogue(buf: &[u8], expected: bool) {
    assert_eq!(ends_with_redraw(buf), expected);
}

#[test]
fn parser_relays_raw_lines_and_state_changes() -> anyhow::Result<()> {
    let mut parser = OutputParser::new(table()?);
    let events = parser.feed(b"\x1b[1m> hello\x1b[0m\n");

    assert_eq!(events.len(), 2);
    assert!(events[0].is_raw());
    assert_eq!(events[0].line, "\x1b[1m> hello\x1b[0m");
    assert_eq!(events[1].state, Some(SessionState::Asking));
    assert_eq!(events[1].line, "> hello");
    assert!(events.iter().all(|e| e.origin == Origin::Supervised));
    Ok(())
}

#[test]
fn parser_suppresses_repeated_states() -> anyhow::Result<()> {
    let mut parser = OutputParser::new(table()?);
    let spinner = "\u{25c9} Thinking...\x1b[2A\x1b[1G".repeat(5);
    let events = parser.feed(spinner.as_bytes());

    assert_eq!(states(&events), vec![SessionState::Thinking]);
    assert_eq!(events.iter().filter(|e| e.is_raw()).count(), 5);
    Ok(())
}

#[test]
fn reply_after_thinking_is_output() -> anyhow::Result<()> {
    let mut parser = OutputParser::new(table()?);
    let mut events = parser.feed("\u{25c9} Thinking...\x1b[2A".as_bytes());
    events.extend(parser.feed(b"Hello!\n"));
    events.extend(parser.feed(b"How can I help?\n"));
    events.extend(parser.feed(b"> \n"));

    assert_eq!(
        states(&events),
        vec![SessionState::Thinking, SessionState::Output, SessionState::Idle]
    );
    assert_eq!(parser.tracker().last(), Some(SessionState::Idle));
    Ok(())
}

#[test]
fn finish_flushes_pending_text() -> anyhow::Result<()> {
    let mut parser = OutputParser::new(table()?);
    assert!(parser.feed(b"Goodbye").is_empty());
    let events = parser.finish();
    assert_eq!(states(&events), vec![SessionState::Quitting]);
    Ok(())
}
