// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered pattern table and the emit-on-change state classifier.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::event::SessionState;

const QUITTING: &str = r"(?i)\b(?:goodbye|quitting|exiting)\b";
const RUNNING_COMMAND: &str = r"(?i)(?:running|executing)(?: command| tool)?(?:\.\.\.|\x{2026}|:)";
const THINKING: &str = r"(?i)(?:thinking|preparing)(?:\.\.\.|\x{2026})";
const ASKING: &str = r"^\s*[>\x{276F}]\s+\S";
const OUTPUT: &str = r"^\s*[\x{25CF}\x{23FA}](?:\s|$)";
const IDLE: &str = r"^\s*[>\x{276F}]\s*$";

/// User-provided JSON overrides for the pattern table.
///
/// Each field replaces the built-in regex for one state; omitted fields keep
/// the default. Precedence is fixed regardless of which fields are set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternConfig {
    pub quitting: Option<String>,
    pub running_command: Option<String>,
    pub thinking: Option<String>,
    pub asking: Option<String>,
    pub output: Option<String>,
    pub idle: Option<String>,
}

/// One classification rule. Priority is its position in the table.
pub struct PatternRule {
    pub state: SessionState,
    pub matcher: Regex,
}

impl std::fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRule")
            .field("state", &self.state)
            .field("matcher", &self.matcher.as_str())
            .finish()
    }
}

/// Read-only rule table, built once at startup and shared by reference.
#[derive(Debug)]
pub struct PatternTable {
    rules: Vec<PatternRule>,
}

impl PatternTable {
    /// Compile the built-in table.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_config(&PatternConfig::default())
    }

    /// Load overrides from a JSON file and compile the table.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PatternConfig = serde_json::from_str(&contents)?;
        Self::from_config(&config)
    }

    /// Compile a table from `config`, falling back to built-ins per field.
    pub fn from_config(config: &PatternConfig) -> anyhow::Result<Self> {
        let ordered = [
            (SessionState::Quitting, config.quitting.as_deref().unwrap_or(QUITTING)),
            (
                SessionState::RunningCommand,
                config.running_command.as_deref().unwrap_or(RUNNING_COMMAND),
            ),
            (SessionState::Thinking, config.thinking.as_deref().unwrap_or(THINKING)),
            (SessionState::Asking, config.asking.as_deref().unwrap_or(ASKING)),
            (SessionState::Output, config.output.as_deref().unwrap_or(OUTPUT)),
            (SessionState::Idle, config.idle.as_deref().unwrap_or(IDLE)),
        ];

        let rules = ordered
            .into_iter()
            .map(|(state, pattern)| {
                Regex::new(pattern)
                    .map(|matcher| PatternRule { state, matcher })
                    .map_err(|e| anyhow::anyhow!("invalid {state} pattern: {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// First rule matching `text`, in table order.
    pub fn first_match(&self, text: &str) -> Option<SessionState> {
        self.rules.iter().find(|r| r.matcher.is_match(text)).map(|r| r.state)
    }

    /// Whether `text` matches a rule that must be emitted without waiting
    /// for a delimiter (`Thinking` or `RunningCommand`).
    pub fn matches_urgent(&self, text: &str) -> bool {
        self.rules
            .iter()
            .filter(|r| matches!(r.state, SessionState::Thinking | SessionState::RunningCommand))
            .any(|r| r.matcher.is_match(text))
    }
}

/// Classify one normalized unit.
///
/// Table order decides; if nothing matches and the previous emitted state was
/// `Thinking`, any non-blank text is the start of the reply (`Output`).
pub fn classify(
    table: &PatternTable,
    text: &str,
    prev: Option<SessionState>,
) -> Option<SessionState> {
    if let Some(state) = table.first_match(text) {
        return Some(state);
    }
    if prev == Some(SessionState::Thinking) && !text.trim().is_empty() {
        return Some(SessionState::Output);
    }
    None
}

/// Holds the last emitted state and reports only changes.
#[derive(Debug, Default)]
pub struct StateTracker {
    last: Option<SessionState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<SessionState> {
        self.last
    }

    /// Classify `text` and return the state only if it differs from the last
    /// one emitted.
    pub fn observe(&mut self, table: &PatternTable, text: &str) -> Option<SessionState> {
        let next = classify(table, text, self.last)?;
        if self.last == Some(next) {
            return None;
        }
        self.last = Some(next);
        Some(next)
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
