// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message as ClientMessage;

use crate::envelope::{epoch_ms, Message};
use crate::history::HistoryStore;
use crate::test_support::{
    wait_for, ws_connect, ws_next_json, ws_next_text, ws_send_text, AppStateBuilder,
    FailingHistory, TestNode, WsClient,
};

const WAIT: Duration = Duration::from_secs(5);

/// Connect and consume the initial history batch.
async fn join(node: &TestNode) -> anyhow::Result<(WsClient, serde_json::Value)> {
    let mut ws = ws_connect(&node.ws_url()).await?;
    let batch = ws_next_json(&mut ws).await?;
    assert_eq!(batch["type"], "history");
    Ok((ws, batch))
}

/// Wait for the server's close frame and return its code and reason.
async fn close_frame(ws: &mut WsClient) -> anyhow::Result<(u16, String)> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream ended without close frame"))??;
        if let ClientMessage::Close(frame) = msg {
            let frame = frame.ok_or_else(|| anyhow::anyhow!("close frame without payload"))?;
            return Ok((u16::from(frame.code), frame.reason.to_string()));
        }
    }
}

#[tokio::test]
async fn history_batch_precedes_live_messages() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().build();
    let now = epoch_ms();
    state.history.record(&Message::chat("earlier", now - 1000))?;
    state.history.record(&Message::chat("older than window", now - 31 * 60_000))?;
    let node = TestNode::start(state).await?;

    let (mut ws, batch) = join(&node).await?;
    let messages = batch["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "earlier");
    assert_eq!(messages[0]["ts"], now - 1000);

    ws_send_text(&mut ws, "hello").await?;
    let live = ws_next_json(&mut ws).await?;
    assert_eq!(live["text"], "hello");
    assert!(live.get("type").is_none());
    Ok(())
}

#[tokio::test]
async fn structured_frames_get_server_timestamps() -> anyhow::Result<()> {
    let node = TestNode::start(AppStateBuilder::new().build()).await?;
    let (mut ws, _) = join(&node).await?;

    let before = epoch_ms();
    ws_send_text(&mut ws, r#"{"type":"chat","text":"hi","ts":1000}"#).await?;
    let live = ws_next_json(&mut ws).await?;
    assert_eq!(live["text"], "hi");
    let ts = live["ts"].as_u64().unwrap_or_default();
    assert!(ts >= before, "client timestamp leaked through: {ts}");

    let stored = node.state.history.query(30)?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].ts, ts);
    Ok(())
}

#[tokio::test]
async fn malformed_frames_keep_connection_open() -> anyhow::Result<()> {
    let node = TestNode::start(AppStateBuilder::new().build()).await?;
    let (mut ws, _) = join(&node).await?;

    for bad in ["", "   ", r#"{"type":"typing","text":"x"}"#, r#"{"text":5}"#, r#"{}"#] {
        ws_send_text(&mut ws, bad).await?;
    }
    ws_send_text(&mut ws, "still here").await?;

    let live = ws_next_json(&mut ws).await?;
    assert_eq!(live["text"], "still here");

    let snap = node.state.counters.snapshot();
    assert_eq!(snap.messages_dropped.empty, 2);
    assert_eq!(snap.messages_dropped.unsupported_kind, 1);
    assert_eq!(snap.messages_dropped.missing_text, 2);
    assert_eq!(snap.messages_ingested, 1);
    Ok(())
}

#[tokio::test]
async fn every_local_connection_receives_in_order() -> anyhow::Result<()> {
    let node = TestNode::start(AppStateBuilder::new().build()).await?;
    let (mut alice, _) = join(&node).await?;
    let (mut bob, _) = join(&node).await?;

    for i in 0..20 {
        ws_send_text(&mut alice, &format!("m{i}")).await?;
    }
    for ws in [&mut alice, &mut bob] {
        for i in 0..20 {
            let live = ws_next_json(ws).await?;
            assert_eq!(live["text"], format!("m{i}"));
        }
    }
    Ok(())
}

#[tokio::test]
async fn history_failure_degrades_to_empty_batch() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().history(std::sync::Arc::new(FailingHistory)).build();
    let node = TestNode::start(state).await?;

    let (mut ws, batch) = join(&node).await?;
    assert_eq!(batch["messages"], serde_json::json!([]));

    ws_send_text(&mut ws, "delivered anyway").await?;
    let live = ws_next_json(&mut ws).await?;
    assert_eq!(live["text"], "delivered anyway");
    assert_eq!(node.state.counters.snapshot().history_errors, 2);
    Ok(())
}

#[tokio::test]
async fn client_close_unregisters() -> anyhow::Result<()> {
    let node = TestNode::start(AppStateBuilder::new().build()).await?;
    let (mut ws, _) = join(&node).await?;
    let registry = std::sync::Arc::clone(&node.state.registry);
    wait_for(WAIT, || registry.len() == 1).await?;

    ws.close(None).await?;
    wait_for(WAIT, || registry.is_empty()).await?;

    let counters = std::sync::Arc::clone(&node.state.counters);
    wait_for(WAIT, move || counters.snapshot().disconnections.client_closed == 1).await?;
    assert_eq!(node.state.counters.snapshot().connected_users, 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_sends_going_away() -> anyhow::Result<()> {
    let node = TestNode::start(AppStateBuilder::new().build()).await?;
    let (mut ws, _) = join(&node).await?;
    let counters = std::sync::Arc::clone(&node.state.counters);
    let registry = std::sync::Arc::clone(&node.state.registry);

    node.stop().await?;

    let (code, reason) = close_frame(&mut ws).await?;
    assert_eq!(code, 1001);
    assert_eq!(reason, "server shutting down");
    assert!(registry.is_empty());
    assert_eq!(counters.snapshot().disconnections.shutdown, 1);
    Ok(())
}

#[tokio::test]
async fn large_history_is_split_into_bounded_frames() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().config(|c| c.history_frame_bytes = 300).build();
    let now = epoch_ms();
    for i in 0..10 {
        state.history.record(&Message::chat(format!("{i:0>40}"), now - 1000 + i))?;
    }
    let node = TestNode::start(state).await?;
    let mut ws = ws_connect(&node.ws_url()).await?;

    let mut texts = Vec::new();
    let mut frames = 0;
    loop {
        let raw = ws_next_text(&mut ws).await?;
        assert!(raw.len() <= 300, "frame of {} bytes", raw.len());
        let batch: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(batch["type"], "history");
        frames += 1;
        for entry in batch["messages"].as_array().cloned().unwrap_or_default() {
            texts.push(entry["text"].as_str().unwrap_or_default().to_owned());
        }
        if batch.get("more").is_none() {
            break;
        }
    }
    assert!(frames > 1);
    let expected: Vec<_> = (0..10).map(|i| format!("{i:0>40}")).collect();
    assert_eq!(texts, expected);

    // Live frames follow the last chunk.
    ws_send_text(&mut ws, "live").await?;
    assert_eq!(ws_next_json(&mut ws).await?["text"], "live");
    Ok(())
}

#[tokio::test]
async fn history_batch_can_be_skipped() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().build();
    state.history.record(&Message::chat("old", epoch_ms()))?;
    let node = TestNode::start(state).await?;

    let mut ws = ws_connect(&format!("{}?history=false", node.ws_url())).await?;
    ws_send_text(&mut ws, "first").await?;
    let frame = ws_next_json(&mut ws).await?;
    assert_eq!(frame["text"], "first");
    assert!(frame.get("type").is_none());
    Ok(())
}

#[tokio::test]
async fn silent_client_is_closed_after_idle_timeout() -> anyhow::Result<()> {
    let state = AppStateBuilder::new()
        .config(|c| {
            c.ping_interval_ms = 50;
            c.idle_timeout_ms = 300;
        })
        .build();
    let node = TestNode::start(state).await?;
    // Never polled after the history batch, so no pong ever goes back.
    let (_ws, _) = join(&node).await?;

    let counters = std::sync::Arc::clone(&node.state.counters);
    wait_for(WAIT, move || counters.snapshot().disconnections.idle_timeout == 1).await?;
    assert!(node.state.registry.is_empty());
    assert_eq!(node.state.counters.snapshot().connected_users, 0);
    Ok(())
}

#[tokio::test]
async fn pongs_keep_quiet_client_alive() -> anyhow::Result<()> {
    let state = AppStateBuilder::new()
        .config(|c| {
            c.ping_interval_ms = 50;
            c.idle_timeout_ms = 300;
        })
        .build();
    let node = TestNode::start(state).await?;
    let (mut ws, _) = join(&node).await?;

    // Keep polling for three idle periods; tungstenite answers each ping.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(900);
    let mut pings = 0;
    while let Ok(msg) = tokio::time::timeout_at(deadline, ws.next()).await {
        match msg {
            Some(Ok(ClientMessage::Ping(_))) => pings += 1,
            other => anyhow::bail!("unexpected frame {other:?}"),
        }
    }
    assert!(pings >= 3, "only {pings} pings");
    assert_eq!(node.state.registry.len(), 1);
    assert_eq!(node.state.counters.snapshot().disconnections.idle_timeout, 0);
    Ok(())
}

#[tokio::test]
async fn full_outbox_closes_with_policy_violation() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().config(|c| c.outbound_capacity = 1).build();
    let node = TestNode::start(state).await?;
    let (mut ws, _) = join(&node).await?;
    let registry = std::sync::Arc::clone(&node.state.registry);
    wait_for(WAIT, || registry.len() == 1).await?;

    // Nothing is read and the writer never gets to run between these sends.
    let mut overflowed = false;
    for i in 0..1000 {
        if registry.broadcast_local(&Message::chat(format!("flood {i}"), i)).dropped == 1 {
            overflowed = true;
            break;
        }
    }
    assert!(overflowed, "outbox never filled");

    let (code, reason) = close_frame(&mut ws).await?;
    assert_eq!(code, 1008);
    assert_eq!(reason, "slow consumer");

    let counters = std::sync::Arc::clone(&node.state.counters);
    wait_for(WAIT, move || counters.snapshot().disconnections.slow_consumer == 1).await?;
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_stalled_history_replay() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().build();
    let text = "h".repeat(4000);
    let now = epoch_ms();
    for _ in 0..5000 {
        state.history.record(&Message::chat(text.as_str(), now))?;
    }
    let node = TestNode::start(state).await?;
    let state = std::sync::Arc::clone(&node.state);

    // Connect but never read, so the replay backs up into the socket.
    let _ws = ws_connect(&node.ws_url()).await?;
    let registry = std::sync::Arc::clone(&state.registry);
    wait_for(WAIT, move || registry.len() == 1).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    node.stop().await?;
    assert!(state.connections.is_empty(), "handler still running after drain");
    assert_eq!(state.counters.snapshot().disconnections.shutdown, 1);
    Ok(())
}
