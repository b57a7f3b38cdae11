// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::backbone::{Backbone, LocalHub};
use crate::config::ServerConfig;
use crate::envelope::Message;
use crate::history::{HistoryStore, MemoryHistory};
use crate::state::AppState;

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// History store whose every operation fails.
pub struct FailingHistory;

impl HistoryStore for FailingHistory {
    fn record(&self, _msg: &Message) -> anyhow::Result<()> {
        anyhow::bail!("history unavailable")
    }

    fn query_at(&self, _minutes: u32, _now_ms: u64) -> anyhow::Result<Vec<Message>> {
        anyhow::bail!("history unavailable")
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Builder for [`AppState`] with test-friendly defaults: ephemeral port,
/// fast bridge backoff, in-memory history, and a private local backbone.
pub struct AppStateBuilder {
    config: ServerConfig,
    backbone: Option<Arc<dyn Backbone>>,
    history: Option<Arc<dyn HistoryStore>>,
    shutdown: CancellationToken,
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        let config = ServerConfig {
            backoff_base_ms: 10,
            backoff_cap_ms: 100,
            close_timeout_ms: 500,
            ..ServerConfig::test()
        };
        Self { config, backbone: None, history: None, shutdown: CancellationToken::new() }
    }

    pub fn config(mut self, f: impl FnOnce(&mut ServerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn instance(self, id: &str) -> Self {
        let id = id.to_owned();
        self.config(|c| c.instance_id = Some(id))
    }

    pub fn backbone(mut self, backbone: Arc<dyn Backbone>) -> Self {
        self.backbone = Some(backbone);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn build(self) -> Arc<AppState> {
        let backbone = self.backbone.unwrap_or_else(|| Arc::new(LocalHub::new().connect()));
        let history = self.history.unwrap_or_else(|| {
            Arc::new(MemoryHistory::new(
                self.config.history_capacity,
                self.config.history_retention(),
            ))
        });
        Arc::new(AppState::new(self.config, backbone, history, self.shutdown))
    }
}

/// Spawn an HTTP server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task. The
/// server stops when the state's shutdown token is cancelled.
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    spawn_http_server_at(state, "127.0.0.1:0").await
}

/// Like [`spawn_http_server`], bound to a fixed address.
pub async fn spawn_http_server_at(
    state: Arc<AppState>,
    addr: impl tokio::net::ToSocketAddrs,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let shutdown = state.shutdown.clone();
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ =
            axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
    });
    Ok((addr, handle))
}

/// A running in-process server: HTTP listener plus bridge.
pub struct TestNode {
    pub state: Arc<AppState>,
    pub addr: SocketAddr,
    server: JoinHandle<()>,
    bridge: JoinHandle<()>,
}

impl TestNode {
    /// Start serving `state` and wait until the bridge is subscribed.
    pub async fn start(state: Arc<AppState>) -> anyhow::Result<Self> {
        Self::start_at(state, "127.0.0.1:0").await
    }

    /// Start on a fixed address, e.g. to restart a stopped node in place.
    pub async fn start_at(
        state: Arc<AppState>,
        addr: impl tokio::net::ToSocketAddrs,
    ) -> anyhow::Result<Self> {
        let bridge = state.bridge.spawn(state.shutdown.clone());
        let (addr, server) = spawn_http_server_at(Arc::clone(&state), addr).await?;
        let watched = Arc::clone(&state);
        wait_for(Duration::from_secs(5), move || watched.bridge.is_subscribed()).await?;
        Ok(Self { state, addr, server, bridge })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Graceful shutdown, as on SIGTERM.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.state.shutdown.cancel();
        crate::drain(&self.state).await;
        tokio::time::timeout(Duration::from_secs(5), self.bridge).await??;
        tokio::time::timeout(Duration::from_secs(5), self.server).await??;
        Ok(())
    }
}

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a raw WebSocket to `url`.
pub async fn ws_connect(url: &str) -> anyhow::Result<WsClient> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws)
}

/// Send one text frame.
pub async fn ws_send_text(ws: &mut WsClient, text: &str) -> anyhow::Result<()> {
    ws.send(WsMessage::Text(text.to_owned().into())).await?;
    Ok(())
}

/// Next text frame, skipping control frames. Errors on close or timeout.
pub async fn ws_next_text(ws: &mut WsClient) -> anyhow::Result<String> {
    let deadline = Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("websocket ended"))??;
        match msg {
            WsMessage::Text(text) => return Ok(text.to_string()),
            WsMessage::Close(frame) => anyhow::bail!("websocket closed: {frame:?}"),
            _ => continue,
        }
    }
}

/// Next frame parsed as JSON.
pub async fn ws_next_json(ws: &mut WsClient) -> anyhow::Result<serde_json::Value> {
    let text = ws_next_text(ws).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Check that a binary is available in PATH.
pub fn has_binary(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// A throwaway `nats-server` on a free port, killed on drop.
pub struct NatsServer {
    child: Child,
    port: u16,
}

impl NatsServer {
    /// Start a server, or return `None` when `nats-server` is not installed.
    pub async fn start() -> anyhow::Result<Option<Self>> {
        if !has_binary("nats-server") {
            return Ok(None);
        }
        let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let child = Command::new("nats-server")
            .args(["-a", "127.0.0.1", "-p", &port.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let server = Self { child, port };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while TcpStream::connect(("127.0.0.1", port)).await.is_err() {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("nats-server did not start on port {port}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(Some(server))
    }

    pub fn url(&self) -> String {
        format!("nats://127.0.0.1:{}", self.port)
    }
}

impl Drop for NatsServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
