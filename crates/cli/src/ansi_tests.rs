// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;
use regex::Regex;

use super::*;
use crate::classify::{classify, PatternTable};

#[yare::parameterized(
    sgr = { "\x1b[1;32mok\x1b[0m", "ok" },
    cursor_up = { "line\x1b[2A", "line" },
    clear_line = { "\x1b[2Kprompt", "prompt" },
    hide_cursor = { "\x1b[?25lspin\x1b[?25h", "spin" },
    osc_title_bel = { "\x1b]0;amp\x07body", "body" },
    osc_title_st = { "\x1b]2;amp\x1b\\body", "body" },
    charset = { "\x1b(Btext", "text" },
    save_restore = { "\x1b7a\x1b8b", "ab" },
    carriage_return = { "a\rb", "ab" },
    keeps_newline = { "a\nb\nc", "a\nb\nc" },
    keeps_unicode = { "\u{25c9} Thinking\u{2026}", "\u{25c9} Thinking\u{2026}" },
    truncated_tail = { "done\x1b[3", "done" },
    bare_escape_tail = { "done\x1b", "done" },
)]
fn strips(input: &str, expected: &str) {
    assert_eq!(strip(input), expected);
}

/// Reference stripper used only to cross-check [`strip`].
fn reference_strip(text: &str) -> String {
    let escapes = Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[0-~]",
    );
    let controls = Regex::new(r"[\x00-\x09\x0b-\x1f\x7f]");
    match (escapes, controls) {
        (Ok(esc), Ok(ctl)) => ctl.replace_all(&esc.replace_all(text, ""), "").into_owned(),
        _ => String::from("<invalid reference regex>"),
    }
}

const ESCAPES: &[&str] = &[
    "\x1b[0m",
    "\x1b[1;31m",
    "\x1b[38;5;208m",
    "\x1b[2K",
    "\x1b[K",
    "\x1b[1G",
    "\x1b[3A",
    "\x1b[J",
    "\x1b[?25l",
    "\x1b[?25h",
    "\x1b[?2004h",
    "\x1b[H",
    "\x1b]0;amp\x07",
    "\x1b(B",
    "\x1b7",
    "\x1b8",
    "\r",
];

const PHRASES: &[&str] = &[
    "\u{25c9} Thinking...",
    "Running command...",
    "> ",
    "\u{276f} ",
    "\u{25cf} ",
    "Goodbye!",
    "Preparing\u{2026}",
];

fn segment() -> impl Strategy<Value = (String, bool)> {
    prop_oneof![
        "[a-zA-Z0-9 .!?>:]{0,12}".prop_map(|s| (s, true)),
        prop::sample::select(PHRASES).prop_map(|s| (s.to_owned(), true)),
        prop::sample::select(ESCAPES).prop_map(|s| (s.to_owned(), false)),
    ]
}

proptest! {
    #[test]
    fn matches_reference_stripper(segments in prop::collection::vec(segment(), 0..16)) {
        let escaped: String = segments.iter().map(|(s, _)| s.as_str()).collect();
        prop_assert_eq!(strip(&escaped), reference_strip(&escaped));
    }

    #[test]
    fn classification_ignores_escapes(
        segments in prop::collection::vec(segment(), 0..16),
        prev in prop::option::of(prop::sample::select(crate::event::SessionState::ALL.to_vec())),
    ) {
        let table = PatternTable::builtin().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let escaped: String = segments.iter().map(|(s, _)| s.as_str()).collect();
        let plain: String =
            segments.iter().filter(|(_, text)| *text).map(|(s, _)| s.as_str()).collect();
        prop_assert_eq!(
            classify(&table, strip(&escaped).trim(), prev),
            classify(&table, plain.trim(), prev)
        );
    }
}
