// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process backbone.
//!
//! A [`LocalHub`] plays the role of the broker; each [`LocalBackbone`] handle
//! is one process's link to it. Handles can be partitioned and healed, which
//! ends their feeds and rejects publishes in between.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use super::{Backbone, Feed};

const DEFAULT_CAPACITY: usize = 1024;

/// Shared in-process broker.
#[derive(Debug)]
pub struct LocalHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self { channels: Mutex::new(HashMap::new()), capacity: capacity.max(1) })
    }

    /// Open a new link to the hub.
    pub fn connect(self: &Arc<Self>) -> LocalBackbone {
        LocalBackbone {
            hub: Arc::clone(self),
            online: Arc::new(AtomicBool::new(true)),
            link: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

/// One link to a [`LocalHub`]. Clones share the link state.
#[derive(Debug, Clone)]
pub struct LocalBackbone {
    hub: Arc<LocalHub>,
    online: Arc<AtomicBool>,
    link: Arc<Mutex<CancellationToken>>,
}

impl LocalBackbone {
    /// Sever the link: live feeds end and publishes fail until [`reconnect`].
    ///
    /// [`reconnect`]: Self::reconnect
    pub fn disconnect(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.link.lock().cancel();
    }

    pub fn reconnect(&self) {
        *self.link.lock() = CancellationToken::new();
        self.online.store(true, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> anyhow::Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            anyhow::bail!("local backbone link is down");
        }
        Ok(())
    }
}

impl Backbone for LocalBackbone {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.ensure_online()?;
            // No subscribers is not an error for a broadcast medium.
            let _ = self.hub.sender(channel).send(payload);
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Feed>> + Send + 'a>> {
        Box::pin(async move {
            self.ensure_online()?;
            let rx = self.hub.sender(channel).subscribe();
            let link = self.link.lock().clone();
            let feed = BroadcastStream::new(rx)
                .filter_map(|item| async move {
                    match item {
                        Ok(payload) => Some(payload),
                        Err(e) => {
                            tracing::debug!(err = %e, "local backbone feed lagged");
                            None
                        }
                    }
                })
                .take_until(link.cancelled_owned());
            let feed: Feed = Box::pin(feed);
            Ok(feed)
        })
    }

    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
