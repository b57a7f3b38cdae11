// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `chatfan` binary.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use chatfan_specs::ChatfanProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn next_json<S>(ws: &mut S) -> anyhow::Result<serde_json::Value>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("websocket ended"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let chatfan = ChatfanProcess::start(&["--instance-id", "smoke"])?;
    chatfan.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", chatfan.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["backbone"], "connected");
    assert_eq!(resp["instance"], "smoke");
    assert_eq!(resp["connections"], 0);
    Ok(())
}

#[tokio::test]
async fn http_messages_validates_minutes() -> anyhow::Result<()> {
    let chatfan = ChatfanProcess::start(&[])?;
    chatfan.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let cases = [("", 200), ("?minutes=5", 200), ("?minutes=0", 400), ("?minutes=x", 400)];
    for (query, status) in cases {
        let url = format!("{}/api/v1/messages{query}", chatfan.base_url());
        let resp = client.get(&url).send().await?;
        assert_eq!(resp.status().as_u16(), status, "query {query:?}");
    }

    let body: serde_json::Value = client
        .get(format!("{}/api/v1/messages?minutes=99999", chatfan.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn ws_roundtrip_lands_in_history() -> anyhow::Result<()> {
    let chatfan = ChatfanProcess::start(&[])?;
    chatfan.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(chatfan.ws_url()).await?;
    let history = next_json(&mut ws).await?;
    assert_eq!(history["type"], "history");
    assert_eq!(history["messages"], serde_json::json!([]));

    ws.send(Message::Text(r#"{"text":"smoke-marker"}"#.to_owned().into())).await?;
    let echo = next_json(&mut ws).await?;
    assert_eq!(echo["text"], "smoke-marker");
    assert!(echo["ts"].is_u64());

    let body: serde_json::Value =
        reqwest::get(format!("{}/api/v1/messages", chatfan.base_url())).await?.json().await?;
    assert_eq!(body["messages"][0]["text"], "smoke-marker");
    assert_eq!(body["messages"][0]["ts"], echo["ts"]);
    Ok(())
}

#[tokio::test]
async fn sigterm_closes_clients_as_going_away() -> anyhow::Result<()> {
    let mut chatfan = ChatfanProcess::start(&[])?;
    chatfan.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(chatfan.ws_url()).await?;
    next_json(&mut ws).await?;

    chatfan.terminate()?;
    let close = loop {
        match tokio::time::timeout(TIMEOUT, ws.next()).await? {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => anyhow::bail!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(close.map(|f| f.code), Some(CloseCode::Away));

    let status = chatfan.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "exit status {status:?}");
    Ok(())
}

// -- Configuration ------------------------------------------------------------

#[tokio::test]
async fn invalid_config_exits_with_usage_code() -> anyhow::Result<()> {
    let mut chatfan =
        ChatfanProcess::start(&["--history-minutes", "60", "--history-retention-minutes", "30"])?;
    let status = chatfan.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}
