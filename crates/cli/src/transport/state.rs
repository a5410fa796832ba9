// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hub::Hub;
use crate::input::InputGateway;
use crate::session::SessionStatus;

/// Shared application state passed to all handlers via axum `State` extractor.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub gateway: Arc<InputGateway>,
    pub resize_tx: mpsc::Sender<(u16, u16)>,
    pub status: Arc<SessionStatus>,
    /// Cancelled when the session ends; open sockets close on it.
    pub shutdown: CancellationToken,
}
