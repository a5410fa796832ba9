// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `ampbridge` binary and exercise
//! its HTTP and WebSocket surfaces.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use ampbridge_specs::BridgeProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(ws: &mut WsStream) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        match msg {
            Message::Text(t) => return Ok(serde_json::from_str(&t)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("expected text ws message, got: {other:?}"),
        }
    }
}

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start(&["sleep", "10"])?;
    bridge.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", bridge.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert!(resp["pid"].is_number());
    assert!(resp["uptime_secs"].is_number());
    assert_eq!(resp["observers"], 0);

    Ok(())
}

#[tokio::test]
async fn http_resize_validates() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start(&["sleep", "10"])?;
    bridge.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/resize", bridge.base_url());

    let ok = client.post(&url).json(&serde_json::json!({"cols": 100, "rows": 30})).send().await?;
    assert_eq!(ok.status().as_u16(), 200);

    let bad = client.post(&url).json(&serde_json::json!({"cols": 0, "rows": 30})).send().await?;
    assert_eq!(bad.status().as_u16(), 400);

    Ok(())
}

// -- Exit status --------------------------------------------------------------

#[tokio::test]
async fn exit_code_mirrors_program() -> anyhow::Result<()> {
    let mut bridge = BridgeProcess::start(&["sh", "-c", "sleep 0.5; exit 7"])?;
    let status = bridge.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(7));
    Ok(())
}

#[tokio::test]
async fn missing_program_fails_fast() -> anyhow::Result<()> {
    let mut bridge = BridgeProcess::start(&["/nonexistent/ampbridge-smoke-program"])?;
    let status = bridge.wait_exit(TIMEOUT).await?;
    assert!(!status.success());
    Ok(())
}

#[tokio::test]
async fn sigterm_stops_bridge() -> anyhow::Result<()> {
    let mut bridge = BridgeProcess::start(&["sleep", "60"])?;
    bridge.wait_healthy(TIMEOUT).await?;

    let killed =
        std::process::Command::new("kill").args(["-TERM", &bridge.pid().to_string()]).status()?;
    assert!(killed.success());

    let _status = bridge.wait_exit(TIMEOUT).await?;
    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn ws_greeting_then_output() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start(&["sh", "-c", "sleep 1; echo '> smoke-prompt'; sleep 5"])?;
    bridge.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(bridge.ws_url()).await?;
    let greeting = next_json(&mut ws).await?;
    assert_eq!(greeting["state"], "Idle");
    assert_eq!(greeting["from"], "amp");

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "never saw the prompt");
        let event = next_json(&mut ws).await?;
        if event["state"] == "Asking" && event["line"] == "> smoke-prompt" {
            return Ok(());
        }
    }
}

#[tokio::test]
async fn ws_input_reaches_program() -> anyhow::Result<()> {
    let bridge = BridgeProcess::start(&["cat"])?;
    bridge.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(bridge.ws_url()).await?;
    next_json(&mut ws).await?;

    ws.send(Message::Text(r#"{"type":"input","data":"smoke-roundtrip"}"#.into())).await?;

    let mut saw_echo = false;
    let mut saw_output = false;
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !(saw_echo && saw_output) {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "input never round-tripped");
        let event = next_json(&mut ws).await?;
        if event["line"] != "smoke-roundtrip" {
            continue;
        }
        if event["from"] == "client" {
            assert_eq!(event["state"], "Asking");
            saw_echo = true;
        } else if event.get("state").is_none() {
            saw_output = true;
        }
    }
    Ok(())
}
