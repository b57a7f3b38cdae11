// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capped exponential backoff shared by the bridge and the client reconnector.

use std::time::Duration;

/// `delay(attempt) = min(base * 2^(attempt - 1), cap)` for `attempt >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_millis(base_ms: u64, cap_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
    }

    /// Delay before the given 1-based attempt. Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let base_ms = self.base.as_millis() as u64;
        let ms = base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(1000, 30_000)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
