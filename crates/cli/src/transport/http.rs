// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request and response types and handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::transport::state::AppState;
use crate::transport::ApiError;

// ---------------------------------------------------------------------------
// GET /api/v1/health
// ---------------------------------------------------------------------------

/// Response for `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub pid: Option<u32>,
    pub uptime_secs: u64,
    pub observers: usize,
    /// Last classified state, absent before the first classification.
    pub state: Option<String>,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if s.shutdown.is_cancelled() { "exited" } else { "running" };
    Json(HealthResponse {
        status: status.to_owned(),
        pid: s.status.child_pid(),
        uptime_secs: s.status.uptime().as_secs(),
        observers: s.hub.len(),
        state: s.status.last_state().map(|st| st.as_str().to_owned()),
    })
}

// ---------------------------------------------------------------------------
// POST /api/v1/resize
// ---------------------------------------------------------------------------

/// Request body for `POST /api/v1/resize`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// Response for `POST /api/v1/resize`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResizeResponse {
    pub cols: u16,
    pub rows: u16,
}

/// `POST /api/v1/resize`
pub async fn resize(
    State(s): State<Arc<AppState>>,
    body: Result<Json<ResizeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return ApiError::new(ErrorCode::BadRequest, e.body_text()).into_response(),
    };
    if req.cols == 0 || req.rows == 0 {
        return ApiError::new(ErrorCode::BadRequest, "cols and rows must be positive")
            .into_response();
    }
    match s.resize_tx.send((req.cols, req.rows)).await {
        Ok(()) => Json(ResizeResponse { cols: req.cols, rows: req.rows }).into_response(),
        Err(_) => ApiError::new(ErrorCode::Exited, "program has exited").into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
