// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, time-windowed store of recent messages.
//!
//! Logically an insertion-ordered sequence queried by "timestamp within the
//! last N minutes". The in-memory implementation is a ring of at most
//! `capacity` messages that also drops entries older than the retention
//! horizon as new ones arrive.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::envelope::{epoch_ms, Message};

const MINUTE_MS: u64 = 60_000;

/// Recent-history storage shared by every connection handler in a process.
pub trait HistoryStore: Send + Sync + 'static {
    /// Append a message. Timestamps are assigned before this call, so
    /// concurrent writers need no coordination beyond the store's own.
    fn record(&self, msg: &Message) -> anyhow::Result<()>;

    /// Messages with `ts >= now_ms - minutes * 60_000`, in insertion order.
    ///
    /// Windows longer than the store's retention return what is available.
    fn query_at(&self, minutes: u32, now_ms: u64) -> anyhow::Result<Vec<Message>>;

    fn query(&self, minutes: u32) -> anyhow::Result<Vec<Message>> {
        self.query_at(minutes, epoch_ms())
    }
}

/// In-process ring buffer of messages.
#[derive(Debug)]
pub struct MemoryHistory {
    inner: Mutex<Ring>,
    capacity: usize,
    retention: Duration,
}

#[derive(Debug, Default)]
struct Ring {
    entries: VecDeque<Message>,
    /// Highest timestamp ever recorded; the pruning reference point.
    newest: u64,
}

impl MemoryHistory {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self { inner: Mutex::new(Ring::default()), capacity: capacity.max(1), retention }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn retention_minutes(&self) -> u32 {
        (self.retention.as_millis() as u64 / MINUTE_MS).min(u32::MAX as u64) as u32
    }
}

impl HistoryStore for MemoryHistory {
    fn record(&self, msg: &Message) -> anyhow::Result<()> {
        let mut ring = self.inner.lock();
        ring.newest = ring.newest.max(msg.ts);
        ring.entries.push_back(msg.clone());

        while ring.entries.len() > self.capacity {
            ring.entries.pop_front();
        }

        let horizon = ring.newest.saturating_sub(self.retention.as_millis() as u64);
        while ring.entries.front().is_some_and(|m| m.ts < horizon) {
            ring.entries.pop_front();
        }
        Ok(())
    }

    fn query_at(&self, minutes: u32, now_ms: u64) -> anyhow::Result<Vec<Message>> {
        let minutes = minutes.min(self.retention_minutes());
        let cutoff = now_ms.saturating_sub(u64::from(minutes) * MINUTE_MS);
        let ring = self.inner.lock();
        Ok(ring.entries.iter().filter(|m| m.ts >= cutoff).cloned().collect())
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
