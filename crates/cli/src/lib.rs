// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod ansi;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod framer;
pub mod hub;
pub mod input;
pub mod pty;
pub mod run;
pub mod session;
pub mod test_support;
pub mod transport;
