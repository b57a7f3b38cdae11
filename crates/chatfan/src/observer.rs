// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics observer injected into the core.
//!
//! The core reports lifecycle and delivery events through [`Observer`]; what
//! the observer does with them is not part of any contract. [`Counters`] keeps
//! atomic totals that the `/api/v1/metrics` endpoint serializes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::envelope::ParseError;

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Read or write on the transport failed.
    TransportError,
    /// Outbox overflowed.
    SlowConsumer,
    /// Nothing arrived from the client within the idle timeout.
    IdleTimeout,
    /// Process is shutting down.
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::SlowConsumer => "slow_consumer",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Event hooks called by the core. All methods default to no-ops.
pub trait Observer: Send + Sync + 'static {
    fn connection_opened(&self) {}
    fn connection_failed(&self) {}
    fn connection_closed(&self, _reason: DisconnectReason) {}
    fn message_ingested(&self, _elapsed: Duration) {}
    fn message_dropped(&self, _reason: ParseError) {}
    fn backbone_publish(&self, _ok: bool) {}
    fn backbone_resubscribed(&self) {}
    fn history_error(&self) {}
}

/// Atomic counters for every observer hook.
#[derive(Debug, Default)]
pub struct Counters {
    connected: AtomicI64,
    connections_accepted: AtomicU64,
    connections_failed: AtomicU64,
    closed_client: AtomicU64,
    closed_transport: AtomicU64,
    closed_slow: AtomicU64,
    closed_idle: AtomicU64,
    closed_shutdown: AtomicU64,
    messages_ingested: AtomicU64,
    ingest_micros_total: AtomicU64,
    dropped_empty: AtomicU64,
    dropped_missing_text: AtomicU64,
    dropped_unsupported: AtomicU64,
    dropped_too_long: AtomicU64,
    publish_ok: AtomicU64,
    publish_error: AtomicU64,
    resubscriptions: AtomicU64,
    history_errors: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub connected_users: i64,
    pub connections_accepted: u64,
    pub connections_failed: u64,
    pub disconnections: DisconnectionCounts,
    pub messages_ingested: u64,
    pub ingest_micros_total: u64,
    pub messages_dropped: DropCounts,
    pub backbone_publish_ok: u64,
    pub backbone_publish_error: u64,
    pub backbone_resubscriptions: u64,
    pub history_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectionCounts {
    pub client_closed: u64,
    pub transport_error: u64,
    pub slow_consumer: u64,
    pub idle_timeout: u64,
    pub shutdown: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub empty: u64,
    pub missing_text: u64,
    pub unsupported_kind: u64,
    pub too_long: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            connected_users: self.connected.load(Ordering::Relaxed),
            connections_accepted: get(&self.connections_accepted),
            connections_failed: get(&self.connections_failed),
            disconnections: DisconnectionCounts {
                client_closed: get(&self.closed_client),
                transport_error: get(&self.closed_transport),
                slow_consumer: get(&self.closed_slow),
                idle_timeout: get(&self.closed_idle),
                shutdown: get(&self.closed_shutdown),
            },
            messages_ingested: get(&self.messages_ingested),
            ingest_micros_total: get(&self.ingest_micros_total),
            messages_dropped: DropCounts {
                empty: get(&self.dropped_empty),
                missing_text: get(&self.dropped_missing_text),
                unsupported_kind: get(&self.dropped_unsupported),
                too_long: get(&self.dropped_too_long),
            },
            backbone_publish_ok: get(&self.publish_ok),
            backbone_publish_error: get(&self.publish_error),
            backbone_resubscriptions: get(&self.resubscriptions),
            history_errors: get(&self.history_errors),
        }
    }
}

impl Observer for Counters {
    fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self, reason: DisconnectReason) {
        self.connected.fetch_sub(1, Ordering::Relaxed);
        let counter = match reason {
            DisconnectReason::ClientClosed => &self.closed_client,
            DisconnectReason::TransportError => &self.closed_transport,
            DisconnectReason::SlowConsumer => &self.closed_slow,
            DisconnectReason::IdleTimeout => &self.closed_idle,
            DisconnectReason::Shutdown => &self.closed_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn message_ingested(&self, elapsed: Duration) {
        self.messages_ingested.fetch_add(1, Ordering::Relaxed);
        self.ingest_micros_total.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn message_dropped(&self, reason: ParseError) {
        let counter = match reason {
            ParseError::Empty => &self.dropped_empty,
            ParseError::MissingText => &self.dropped_missing_text,
            ParseError::UnsupportedKind => &self.dropped_unsupported,
            ParseError::TooLong => &self.dropped_too_long,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn backbone_publish(&self, ok: bool) {
        let counter = if ok { &self.publish_ok } else { &self.publish_error };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn backbone_resubscribed(&self) {
        self.resubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    fn history_error(&self) {
        self.history_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "observer_tests.rs"]
mod tests;
