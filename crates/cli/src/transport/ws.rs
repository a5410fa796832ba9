// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer WebSocket: events out, input commands in.
//!
//! Each connection gets a hub registration and a writer task draining its
//! queue. The upgrade task itself reads inbound frames and hands text to the
//! input gateway.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::Event;
use crate::hub::{ObserverId, OBSERVER_QUEUE};
use crate::input::Submission;
use crate::transport::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Per-connection lifetime: register, pump, unregister.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let (conn, events) = state.hub.connect(OBSERVER_QUEUE);
    let id = conn.id;
    // Queued before registration so it precedes any published event.
    let _ = conn.try_send(Arc::new(Event::greeting()));
    state.hub.register(conn);

    let (ws_tx, ws_rx) = socket.split();
    let done = state.shutdown.child_token();
    let writer = tokio::spawn(write_events(ws_tx, events, done.clone()));

    read_commands(&state, id, ws_rx, &done).await;

    state.hub.unregister(id);
    done.cancel();
    if let Err(e) = writer.await {
        debug!(observer = %id, "writer task failed: {e}");
    }
}

/// Forward queued events until the queue closes, the peer goes away, or the
/// connection is cancelled.
async fn write_events(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<Arc<Event>>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if send_json(&mut ws_tx, &event).await.is_err() {
                    break;
                }
            }
        }
    }
    done.cancel();
}

async fn read_commands(
    state: &AppState,
    id: ObserverId,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    done: &CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = done.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(_)) | None => break,
        };

        match msg {
            Message::Text(text) => match state.gateway.submit(&text).await {
                Ok(Submission::Sent(line)) => debug!(observer = %id, %line, "input delivered"),
                Ok(Submission::Ignored) => {}
                Err(code) => debug!(observer = %id, "input dropped: {code}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Send a JSON-serialized event over the WebSocket.
async fn send_json<S>(tx: &mut S, event: &Event) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
