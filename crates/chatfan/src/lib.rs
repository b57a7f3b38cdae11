// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chatfan: multi-instance real-time chat fan-out.

pub mod backbone;
pub mod backoff;
pub mod bridge;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod history;
pub mod observer;
pub mod registry;
pub mod state;
pub mod test_support;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backbone::{Backbone, LocalHub, NatsBackbone};
use crate::config::ServerConfig;
use crate::history::{HistoryStore, MemoryHistory};
use crate::state::AppState;
use crate::transport::build_router;

/// Run the chat server until SIGINT/SIGTERM.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let backbone = connect_backbone(&config).await?;
    let history: Arc<dyn HistoryStore> =
        Arc::new(MemoryHistory::new(config.history_capacity, config.history_retention()));
    let state = Arc::new(AppState::new(config, backbone, history, shutdown.clone()));

    let bridge = state.bridge.spawn(shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, instance = %state.instance, "chatfan listening");

    let router = build_router(Arc::clone(&state));
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    shutdown.cancel();
    drain(&state).await;
    let _ = bridge.await;
    info!("chatfan stopped");
    served?;
    Ok(())
}

/// Pick the backbone: NATS when configured, else an in-process hub that
/// makes this process a room of its own.
pub async fn connect_backbone(config: &ServerConfig) -> anyhow::Result<Arc<dyn Backbone>> {
    match config.nats_url {
        Some(ref url) => {
            let nats = NatsBackbone::connect(url, config.nats_token.as_deref()).await?;
            Ok(Arc::new(nats))
        }
        None => {
            info!("no nats url configured, running as a single-process room");
            Ok(Arc::new(LocalHub::new().connect()))
        }
    }
}

/// Close every registered connection and wait, bounded, for their handlers.
pub async fn drain(state: &AppState) {
    let closed = state.registry.close_all();
    state.connections.close();
    let grace = state.config.close_timeout() + Duration::from_millis(500);
    if tokio::time::timeout(grace, state.connections.wait()).await.is_err() {
        warn!(remaining = state.connections.len(), "connections still open after close timeout");
    }
    info!(closed, "connections drained");
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                shutdown.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    });
}
