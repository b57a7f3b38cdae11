// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PubSub bridge: joins this process's registry to the shared backbone.
//!
//! Every record received on the channel is broadcast locally, including the
//! ones this process published; that echo is the normal delivery path. While
//! the subscription is down, publishes are delivered straight to the local
//! registry so the process stays self-consistent as an isolated room.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backbone::Backbone;
use crate::backoff::Backoff;
use crate::envelope::Message;
use crate::history::HistoryStore;
use crate::observer::Observer;
use crate::registry::Registry;

/// Message as carried on the backbone, tagged with the publishing instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub message: Message,
    pub origin: String,
}

/// How a published message reached local connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the backbone; local delivery happens on the echo.
    Backbone,
    /// Broadcast directly to this process only.
    LocalFallback,
}

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub channel: String,
    pub instance: String,
    /// Record messages from other instances into local history.
    pub mirror_history: bool,
    pub backoff: Backoff,
}

pub struct Bridge {
    backbone: Arc<dyn Backbone>,
    registry: Arc<Registry>,
    history: Arc<dyn HistoryStore>,
    observer: Arc<dyn Observer>,
    config: BridgeConfig,
    subscribed: AtomicBool,
}

impl Bridge {
    pub fn new(
        backbone: Arc<dyn Backbone>,
        registry: Arc<Registry>,
        history: Arc<dyn HistoryStore>,
        observer: Arc<dyn Observer>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backbone,
            registry,
            history,
            observer,
            config,
            subscribed: AtomicBool::new(false),
        })
    }

    pub fn instance(&self) -> &str {
        &self.config.instance
    }

    /// Whether cross-process delivery is currently live.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst) && self.backbone.is_connected()
    }

    /// Spawn the subscription loop. It retries with backoff until `shutdown`.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move { bridge.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let channel = self.config.channel.as_str();
        let kind = self.backbone.kind();
        let mut attempt = 0u32;
        let mut ever_subscribed = false;

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.backbone.subscribe(channel) => r,
            };

            match result {
                Ok(mut feed) => {
                    attempt = 0;
                    self.subscribed.store(true, Ordering::SeqCst);
                    if ever_subscribed {
                        info!(channel, backbone = kind, "bridge resubscribed");
                        self.observer.backbone_resubscribed();
                    } else {
                        info!(channel, backbone = kind, "bridge subscribed");
                    }
                    ever_subscribed = true;

                    let lost = loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break false,
                            item = feed.next() => match item {
                                Some(payload) => self.deliver(&payload),
                                None => break true,
                            },
                        }
                    };
                    self.subscribed.store(false, Ordering::SeqCst);
                    if !lost {
                        break;
                    }
                    warn!(channel, backbone = kind, "bridge subscription lost, delivering locally");
                }
                Err(e) => {
                    warn!(channel, backbone = kind, err = %e, attempt, "bridge subscribe failed");
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.config.backoff.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "bridge retrying subscription");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.subscribed.store(false, Ordering::SeqCst);
        info!(channel, "bridge stopped");
    }

    /// Publish a locally ingested message cluster-wide.
    ///
    /// Never fails: when the backbone is unavailable the message is delivered
    /// to this process's connections directly.
    pub async fn publish(&self, msg: &Message) -> Delivery {
        if self.is_subscribed() {
            let record = Record { message: msg.clone(), origin: self.config.instance.clone() };
            match serde_json::to_vec(&record) {
                Ok(json) => {
                    match self.backbone.publish(&self.config.channel, Bytes::from(json)).await {
                        Ok(()) => {
                            self.observer.backbone_publish(true);
                            return Delivery::Backbone;
                        }
                        Err(e) => {
                            self.observer.backbone_publish(false);
                            warn!(err = %e, "backbone publish failed, delivering locally");
                        }
                    }
                }
                Err(e) => warn!(err = %e, "failed to encode backbone record"),
            }
        }

        self.registry.broadcast_local(msg);
        Delivery::LocalFallback
    }

    /// Handle one payload received from the backbone.
    fn deliver(&self, payload: &[u8]) {
        let record: Record = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                debug!(err = %e, "dropping malformed backbone record");
                return;
            }
        };

        // Mirror before broadcasting: a connection registering in between
        // either sees the message in its history batch or receives it live.
        if self.config.mirror_history && record.origin != self.config.instance {
            if let Err(e) = self.history.record(&record.message) {
                warn!(err = %e, origin = %record.origin, "failed to mirror message into history");
                self.observer.history_error();
            }
        }

        self.registry.broadcast_local(&record.message);
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
