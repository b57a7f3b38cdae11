// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle of one accepted client connection.

use std::fmt;
use std::time::Instant;

/// Connection lifecycle state.
///
/// `Connecting -> Open -> Closing -> Closed`, or `Connecting -> Closed` when
/// the handshake fails. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: ConnState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closed)
                | (Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnState,
    pub to: ConnState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid connection transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Per-connection bookkeeping owned by the handler task.
#[derive(Debug)]
pub struct Connection {
    state: ConnState,
    last_activity: Instant,
    history_replayed: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnState::Connecting,
            last_activity: Instant::now(),
            history_replayed: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn transition(&mut self, next: ConnState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition { from: self.state, to: next });
        }
        self.state = next;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Claim the one-time history replay. Returns true only on the first call.
    pub fn claim_history_replay(&mut self) -> bool {
        !std::mem::replace(&mut self.history_replayed, true)
    }

    pub fn history_replayed(&self) -> bool {
        self.history_replayed
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
