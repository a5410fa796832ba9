// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// How the supervised program is hosted.
///
/// - `Pty`: direct `forkpty` child.
/// - `Tmux`: detached tmux session whose pane output is piped to a FIFO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    #[default]
    Pty,
    Tmux,
}

impl std::fmt::Display for AttachMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pty => f.write_str("pty"),
            Self::Tmux => f.write_str("tmux"),
        }
    }
}

impl std::str::FromStr for AttachMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pty" => Ok(Self::Pty),
            "tmux" => Ok(Self::Tmux),
            other => anyhow::bail!("invalid attach mode: {other}"),
        }
    }
}

/// Bridge an interactive terminal program to WebSocket observers.
#[derive(Debug, Parser)]
#[command(name = "ampbridge", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "AMPBRIDGE_PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "AMPBRIDGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Terminal columns.
    #[arg(long, env = "AMPBRIDGE_COLS", default_value = "120")]
    pub cols: u16,

    /// Terminal rows.
    #[arg(long, env = "AMPBRIDGE_ROWS", default_value = "40")]
    pub rows: u16,

    /// Host the program directly on a PTY (pty) or inside tmux (tmux).
    #[arg(long, env = "AMPBRIDGE_ATTACH", default_value = "pty")]
    pub attach: String,

    /// tmux session name (tmux mode). Defaults to a generated name.
    #[arg(long, env = "AMPBRIDGE_TMUX_SESSION")]
    pub tmux_session: Option<String>,

    /// tmux server socket path (tmux mode). Defaults to the user's server.
    #[arg(long, env = "AMPBRIDGE_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,

    /// JSON file overriding the built-in state patterns.
    #[arg(long, env = "AMPBRIDGE_PATTERNS")]
    pub patterns: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "AMPBRIDGE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AMPBRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to run (after --). Defaults to `amp`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub settle_delay_ms: Option<u64>,
    #[clap(skip)]
    pub shutdown_timeout_ms: Option<u64>,
    #[clap(skip)]
    pub tmux_poll_ms: Option<u64>,
    #[clap(skip)]
    pub reap_poll_ms: Option<u64>,
}

/// Program launched when no command is given.
pub const DEFAULT_COMMAND: &str = "amp";

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cols == 0 || self.rows == 0 {
            anyhow::bail!("--cols and --rows must be non-zero");
        }
        let mode = self.attach_mode()?;
        if mode != AttachMode::Tmux && (self.tmux_session.is_some() || self.tmux_socket.is_some())
        {
            anyhow::bail!("--tmux-session and --tmux-socket require --attach tmux");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if self.command.first().is_some_and(|p| p.is_empty()) {
            anyhow::bail!("command must not be empty");
        }
        Ok(())
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(settle_delay, settle_delay_ms, "AMPBRIDGE_SETTLE_DELAY_MS", 50);
    duration_field!(shutdown_timeout, shutdown_timeout_ms, "AMPBRIDGE_SHUTDOWN_TIMEOUT_MS", 5_000);
    duration_field!(tmux_poll, tmux_poll_ms, "AMPBRIDGE_TMUX_POLL_MS", 1_000);
    duration_field!(reap_poll, reap_poll_ms, "AMPBRIDGE_REAP_POLL_MS", 50);

    /// Build a minimal `Config` for tests (port 0, `echo` command).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            port: 0,
            host: "127.0.0.1".into(),
            cols: 80,
            rows: 24,
            attach: "pty".into(),
            tmux_session: None,
            tmux_socket: None,
            patterns: None,
            log_format: "json".into(),
            log_level: "debug".into(),
            command: vec!["echo".into()],
            settle_delay_ms: Some(5),
            shutdown_timeout_ms: Some(100),
            tmux_poll_ms: Some(50),
            reap_poll_ms: Some(10),
        }
    }

    /// Parse the attach mode string into an enum.
    pub fn attach_mode(&self) -> anyhow::Result<AttachMode> {
        self.attach.parse()
    }

    /// The command line to run, falling back to [`DEFAULT_COMMAND`].
    pub fn command_line(&self) -> Vec<String> {
        if self.command.is_empty() {
            vec![DEFAULT_COMMAND.to_owned()]
        } else {
            self.command.clone()
        }
    }

    /// Session name for tmux mode.
    pub fn tmux_session_name(&self) -> String {
        match self.tmux_session {
            Some(ref name) => name.clone(),
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("ampbridge-{}", &id[..8])
            }
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
