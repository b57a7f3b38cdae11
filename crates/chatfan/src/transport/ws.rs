// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live chat WebSocket endpoint.
//!
//! Each connection runs a read loop in the handler task and a write task that
//! drains the connection's outbox, so a stalled socket never blocks ingestion
//! and a slow reader never blocks other connections. The write task also
//! pings; a client that sends nothing, pongs included, for the idle timeout
//! is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::envelope::{self, epoch_ms, ServerFrame};
use crate::observer::DisconnectReason;
use crate::registry::{ConnectionId, Hangup, Outbox};
use crate::state::AppState;
use crate::transport::connection::{ConnState, Connection};

/// Query parameters for `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// `false` skips the in-band history batch, for clients that already
    /// loaded history out of band.
    pub history: Option<bool>,
}

/// `GET /ws`: upgrade to a live chat connection.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let failed = Arc::clone(&state);
    let replay = params.history.unwrap_or(true);
    ws.on_failed_upgrade(move |e| {
        debug!(err = %e, "websocket handshake failed");
        failed.observer.connection_failed();
    })
    .on_upgrade(move |socket| {
        let tracker = state.connections.clone();
        tracker.track_future(handle_connection(state, socket, replay))
    })
}

/// Per-connection lifecycle: open, replay history, serve, tear down.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket, replay: bool) {
    let mut conn = Connection::new();
    if state.shutdown.is_cancelled() {
        let _ = conn.transition(ConnState::Closed);
        state.observer.connection_failed();
        return;
    }
    let _ = conn.transition(ConnState::Open);

    let (outbox, outbox_rx) = Outbox::channel(state.config.outbound_capacity);
    let hangup = outbox.hangup.clone();
    let id = state.registry.register(outbox);
    state.observer.connection_opened();
    debug!(conn = %id, replay, "connection open");

    let (mut ws_tx, mut ws_rx) = socket.split();

    if replay && conn.claim_history_replay() {
        let messages = match state.history.query(state.config.history_minutes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(conn = %id, err = %e, "history query failed, replaying nothing");
                state.observer.history_error();
                Vec::new()
            }
        };
        let frames = ServerFrame::history_chunks(&messages, state.config.history_frame_bytes);
        let count = frames.len();
        let send_all = async {
            for frame in frames {
                ws_tx.send(WsMessage::Text(frame.to_json().into())).await?;
            }
            Ok::<_, axum::Error>(())
        };
        tokio::select! {
            r = send_all => {
                if let Err(e) = r {
                    debug!(conn = %id, err = %e, "history replay failed");
                    hangup.trigger(DisconnectReason::TransportError);
                } else {
                    // Replay time does not count against the idle timeout.
                    conn.touch();
                    let messages = messages.len();
                    debug!(conn = %id, messages, frames = count, "history replayed");
                }
            }
            _ = hangup.triggered() => {}
            _ = state.shutdown.cancelled() => hangup.trigger(DisconnectReason::Shutdown),
        }
    }

    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbox_rx,
        hangup.clone(),
        state.config.ping_interval(),
        state.config.close_timeout(),
    ));

    let idle_timeout = state.config.idle_timeout();
    let reason = loop {
        let idle_at = tokio::time::Instant::from_std(conn.last_activity() + idle_timeout);
        tokio::select! {
            _ = hangup.triggered() => break DisconnectReason::TransportError,
            _ = state.shutdown.cancelled() => break DisconnectReason::Shutdown,
            _ = tokio::time::sleep_until(idle_at) => break DisconnectReason::IdleTimeout,
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    conn.touch();
                    ingest_frame(&state, id, text.as_str()).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break DisconnectReason::ClientClosed,
                Some(Ok(_)) => conn.touch(),
                Some(Err(e)) => {
                    debug!(conn = %id, err = %e, "websocket read failed");
                    break DisconnectReason::TransportError;
                }
            },
        }
    };

    // A reason recorded earlier (slow consumer, shutdown) takes precedence.
    hangup.trigger(reason);
    let reason = hangup.reason().unwrap_or(reason);

    let _ = conn.transition(ConnState::Closing);
    state.registry.unregister(id);
    let _ = writer.await;
    let _ = conn.transition(ConnState::Closed);

    state.observer.connection_closed(reason);
    debug!(conn = %id, reason = reason.as_str(), "connection closed");
}

/// Parse, record, and publish one inbound text frame. Never fails the socket.
async fn ingest_frame(state: &AppState, id: ConnectionId, raw: &str) {
    let started = Instant::now();
    let msg = match envelope::ingest(raw, epoch_ms(), state.config.max_message_len) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(conn = %id, reason = %e, "dropping inbound payload");
            state.observer.message_dropped(e);
            return;
        }
    };

    if let Err(e) = state.history.record(&msg) {
        warn!(conn = %id, err = %e, "failed to record message");
        state.observer.history_error();
    }
    state.bridge.publish(&msg).await;
    state.observer.message_ingested(started.elapsed());
}

/// Drain the outbox to the socket and ping until hung up, then close politely.
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Arc<str>>,
    hangup: Hangup,
    ping_interval: Duration,
    close_timeout: Duration,
) {
    let first_ping = tokio::time::Instant::now() + ping_interval;
    let mut ping = tokio::time::interval_at(first_ping, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let sent = tokio::select! {
            biased;
            _ = hangup.triggered() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                sink.send(WsMessage::Text(frame.to_string().into())).await
            }
            _ = ping.tick() => sink.send(WsMessage::Ping(Bytes::new())).await,
        };
        if sent.is_err() {
            hangup.trigger(DisconnectReason::TransportError);
            return;
        }
    }

    let close = match hangup.reason() {
        Some(DisconnectReason::SlowConsumer) => Some(CloseFrame {
            code: close_code::POLICY,
            reason: Utf8Bytes::from_static("slow consumer"),
        }),
        Some(DisconnectReason::IdleTimeout) => Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static("idle timeout"),
        }),
        Some(DisconnectReason::Shutdown) => Some(CloseFrame {
            code: close_code::AWAY,
            reason: Utf8Bytes::from_static("server shutting down"),
        }),
        _ => None,
    };
    let flush = async {
        if let Some(frame) = close {
            let _ = sink.send(WsMessage::Close(Some(frame))).await;
        }
        let _ = sink.close().await;
    };
    if tokio::time::timeout(close_timeout, flush).await.is_err() {
        debug!("close frame timed out");
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
