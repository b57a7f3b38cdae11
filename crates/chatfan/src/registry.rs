// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-process set of live connections.
//!
//! Each connection owns a bounded outbox drained by its own write task, so a
//! stalled client never blocks delivery to others. Broadcasts serialize the
//! frame once and enqueue it under the registry lock, which gives every
//! connection the same order of frames from this process.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::envelope::{Message, ServerFrame};
use crate::observer::DisconnectReason;

/// Opaque process-local connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Asynchronous teardown trigger for one connection.
///
/// The first reason wins; later triggers only re-cancel.
#[derive(Debug, Clone, Default)]
pub struct Hangup {
    cancel: CancellationToken,
    reason: Arc<Mutex<Option<DisconnectReason>>>,
}

impl Hangup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: DisconnectReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        *self.reason.lock()
    }

    pub fn is_triggered(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.cancel.cancelled().await;
    }
}

/// Write side of a connection as seen by the registry.
#[derive(Debug, Clone)]
pub struct Outbox {
    pub tx: mpsc::Sender<Arc<str>>,
    pub hangup: Hangup,
}

impl Outbox {
    /// Create an outbox and the receiver its write task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, hangup: Hangup::new() }, rx)
    }
}

/// Outcome of one [`Registry::broadcast_local`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Connections whose outbox was full or closed; each was told to hang up.
    pub dropped: usize,
}

/// Live connection set guarded by a mutex.
#[derive(Debug, Default)]
pub struct Registry {
    next_id: AtomicU64,
    conns: Mutex<HashMap<ConnectionId, Outbox>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.conns.lock().insert(id, outbox);
        id
    }

    /// Remove a connection. Returns whether it was present.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.conns.lock().remove(&id).is_some()
    }

    /// Enqueue `msg` as a live frame on every registered connection.
    ///
    /// Delivery failures never reach the caller: a full outbox hangs the
    /// connection up as a slow consumer, a closed one as a transport error.
    pub fn broadcast_local(&self, msg: &Message) -> BroadcastReport {
        let frame: Arc<str> = ServerFrame::live(msg).to_json().into();
        let mut report = BroadcastReport::default();

        let conns = self.conns.lock();
        for (id, outbox) in conns.iter() {
            if outbox.hangup.is_triggered() {
                continue;
            }
            match outbox.tx.try_send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(conn = %id, "outbox full, disconnecting slow consumer");
                    outbox.hangup.trigger(DisconnectReason::SlowConsumer);
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    outbox.hangup.trigger(DisconnectReason::TransportError);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// Hang up every connection for shutdown and clear the set.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.conns.lock().drain().collect();
        for (_, outbox) in &drained {
            outbox.hangup.trigger(DisconnectReason::Shutdown);
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
