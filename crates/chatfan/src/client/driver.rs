// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async client driving a [`Reconnector`] over tokio-tungstenite.
//!
//! History is fetched out of band from `/api/v1/messages` on the first
//! connect of a session. If that fails, the server's in-band history batch is
//! accepted once instead, reassembled when the server splits it across
//! frames. Later batches are dropped, and once history is loaded reconnects
//! ask the server not to send one, so history is rendered exactly once per
//! session however many times the socket reconnects.

use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::session::{
    CloseDecision, ReconnectPolicy, Reconnector, SendError, SessionState,
};
use crate::envelope::{HistoryEntry, ServerFrame};
use crate::transport::http::MessagesResponse;

static CRYPTO: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto() {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://127.0.0.1:8080`.
    pub url: String,
    pub history_minutes: u32,
    /// Limit on the out-of-band history request.
    pub history_timeout: Duration,
    pub policy: ReconnectPolicy,
}

/// Everything the client reports to its owner, in render order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Notice(String),
    History(Vec<HistoryEntry>),
    Message(HistoryEntry),
    Ended(SessionEnd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Closed,
    GaveUp { attempts: u32 },
}

struct Shared {
    session: Mutex<Reconnector>,
    /// Present only while a socket is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    closing: CancellationToken,
}

/// Handle to a running client session.
pub struct ChatClient {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// Start the session. Events arrive on the returned receiver until
    /// [`ClientEvent::Ended`].
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let shared = Arc::new(Shared {
            session: Mutex::new(Reconnector::new(config.policy)),
            outbound: Mutex::new(None),
            closing: CancellationToken::new(),
        });
        let task = tokio::spawn(drive(Arc::clone(&shared), config, events_tx));
        (Self { shared, task }, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.shared.session.lock().state()
    }

    /// Send a chat line. Fails without touching the network unless connected.
    pub fn send(&self, text: &str) -> Result<(), SendError> {
        let session = self.shared.session.lock();
        session.check_send()?;
        let outbound = self.shared.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if tx.send(text.to_owned()).is_ok() => Ok(()),
            _ => Err(SendError::NotConnected(session.state())),
        }
    }

    /// Close the session. No reconnect follows.
    pub fn close(&self) {
        self.shared.session.lock().close();
        self.shared.closing.cancel();
    }

    /// Wait for the driver task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn drive(shared: Arc<Shared>, config: ClientConfig, events: mpsc::Sender<ClientEvent>) {
    ensure_crypto();
    let http =
        reqwest::Client::builder().timeout(config.history_timeout).build().unwrap_or_default();
    let ws_url = build_ws_url(&config.url);
    shared.session.lock().start();

    loop {
        let url = if shared.session.lock().history_loaded() {
            format!("{ws_url}?history=false")
        } else {
            ws_url.clone()
        };
        let connected = tokio::select! {
            _ = shared.closing.cancelled() => None,
            r = tokio_tungstenite::connect_async(&url) => match r {
                Ok((ws, _)) => Some(ws),
                Err(e) => {
                    debug!(url = %url, err = %e, "connect failed");
                    None
                }
            },
        };

        if let Some(ws) = connected {
            // Sends queue from here on; the socket drains them once pumping.
            let (tx, rx) = mpsc::unbounded_channel();
            let opened = {
                let mut session = shared.session.lock();
                *shared.outbound.lock() = Some(tx);
                session.on_open()
            };
            let _ = events.send(ClientEvent::Notice(opened.notice)).await;

            if opened.needs_history {
                let fetched = tokio::select! {
                    _ = shared.closing.cancelled() => None,
                    r = fetch_history(&http, &config) => Some(r),
                };
                match fetched {
                    Some(Ok(entries)) => {
                        if shared.session.lock().mark_history_loaded() {
                            let _ = events.send(ClientEvent::History(entries)).await;
                        }
                    }
                    Some(Err(e)) => debug!(err = %e, "no history available out of band"),
                    None => {}
                }
            }

            run_socket(ws, rx, &shared, &events).await;
            *shared.outbound.lock() = None;
        }

        let outcome = shared.session.lock().on_close();
        for notice in outcome.notices {
            let _ = events.send(ClientEvent::Notice(notice)).await;
        }
        match outcome.decision {
            CloseDecision::Stopped => {
                let _ = events.send(ClientEvent::Ended(SessionEnd::Closed)).await;
                return;
            }
            CloseDecision::GiveUp { attempts } => {
                let _ = events.send(ClientEvent::Ended(SessionEnd::GaveUp { attempts })).await;
                return;
            }
            CloseDecision::Reconnect { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                tokio::select! {
                    _ = shared.closing.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                if !shared.session.lock().retry() {
                    let _ = events.send(ClientEvent::Ended(SessionEnd::Closed)).await;
                    return;
                }
            }
        }
    }
}

/// Pump one open socket until it closes or the session is closed.
async fn run_socket<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: &Shared,
    events: &mpsc::Sender<ClientEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut pending = Vec::new();
    loop {
        tokio::select! {
            _ = shared.closing.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                let _ = sink.close().await;
                return;
            }
            out = outbound.recv() => {
                let Some(text) = out else { return };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    return;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(event) = frame_event(text.as_str(), shared, &mut pending) {
                        let _ = events.send(event).await;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return,
                Some(Err(e)) => {
                    debug!(err = %e, "socket error");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Map one server frame to an event. History batches pass at most once.
///
/// Chunks of a split batch collect in `pending` until the last one arrives.
fn frame_event(
    text: &str,
    shared: &Shared,
    pending: &mut Vec<HistoryEntry>,
) -> Option<ClientEvent> {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::History { messages, more, .. }) => {
            if shared.session.lock().history_loaded() {
                pending.clear();
                return None;
            }
            pending.extend(messages);
            if more {
                return None;
            }
            let batch = std::mem::take(pending);
            shared.session.lock().mark_history_loaded().then_some(ClientEvent::History(batch))
        }
        Ok(ServerFrame::Live { text, ts }) => Some(ClientEvent::Message(HistoryEntry { text, ts })),
        Ok(ServerFrame::Notice(notice)) => Some(ClientEvent::Notice(notice)),
        Err(_) => Some(ClientEvent::Message(HistoryEntry { text: text.to_owned(), ts: None })),
    }
}

async fn fetch_history(
    http: &reqwest::Client,
    config: &ClientConfig,
) -> anyhow::Result<Vec<HistoryEntry>> {
    let url = format!(
        "{}/api/v1/messages?minutes={}",
        config.url.trim_end_matches('/'),
        config.history_minutes
    );
    let resp = http.get(url).send().await?.error_for_status()?;
    let body: MessagesResponse = resp.json().await?;
    Ok(body.messages)
}

/// Derive the live channel URL from an HTTP base URL.
pub fn build_ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    if ws_base.ends_with("/ws") {
        ws_base
    } else {
        format!("{ws_base}/ws")
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
