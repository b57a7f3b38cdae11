// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical client session across physical reconnects.
//!
//! [`Reconnector`] is synchronous and does no I/O. The driver reports
//! transport events to it and acts on the decisions it returns, which keeps
//! the retry policy testable without sockets or timers.

use std::fmt;
use std::time::Duration;

use crate::backoff::Backoff;

/// Session state as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for unexpected disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// Automatic attempts allowed per outage.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { backoff: Backoff::default(), max_attempts: 5 }
    }
}

/// What the driver should do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Closed on request; the session is over.
    Stopped,
    /// Wait `delay`, then connect again.
    Reconnect { attempt: u32, delay: Duration },
    /// Attempts exhausted; the session is over.
    GiveUp { attempts: u32 },
}

/// Result of [`Reconnector::on_close`]: a decision plus notices to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub decision: CloseDecision,
    pub notices: Vec<String>,
}

/// Result of [`Reconnector::on_open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOutcome {
    /// History has not been loaded in this session yet.
    pub needs_history: bool,
    pub notice: String,
}

/// Returned when a send is attempted outside `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    NotConnected(SessionState),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected(state) => write!(f, "not connected (session is {state})"),
        }
    }
}

impl std::error::Error for SendError {}

pub const CONNECTED_NOTICE: &str = "[connected]";
pub const DISCONNECTED_NOTICE: &str = "[disconnected]";

pub fn reconnecting_notice(delay: Duration, attempt: u32, max_attempts: u32) -> String {
    format!("[reconnecting in {}s... (attempt {attempt}/{max_attempts})]", delay.as_secs_f64())
}

pub fn exhausted_notice(max_attempts: u32) -> String {
    format!("[reconnection failed after {max_attempts} attempts]")
}

/// Client-side reconnection state machine.
#[derive(Debug)]
pub struct Reconnector {
    state: SessionState,
    policy: ReconnectPolicy,
    attempt: u32,
    /// Survives reconnects; history is loaded once per session.
    history_loaded: bool,
    manual_close: bool,
    link_up: bool,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: SessionState::Idle,
            policy,
            attempt: 0,
            history_loaded: false,
            manual_close: false,
            link_up: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Begin connecting. Returns false unless the session was idle.
    pub fn start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Connecting;
        self.attempt = 0;
        self.manual_close = false;
        true
    }

    /// The transport opened.
    pub fn on_open(&mut self) -> OpenOutcome {
        self.state = SessionState::Connected;
        self.attempt = 0;
        self.link_up = true;
        OpenOutcome { needs_history: !self.history_loaded, notice: CONNECTED_NOTICE.to_owned() }
    }

    /// Record that history was rendered. Returns true only the first time,
    /// so callers can drop any later batch.
    pub fn mark_history_loaded(&mut self) -> bool {
        !std::mem::replace(&mut self.history_loaded, true)
    }

    /// The transport closed or failed to open.
    pub fn on_close(&mut self) -> CloseOutcome {
        let mut notices = Vec::new();
        if std::mem::take(&mut self.link_up) {
            notices.push(DISCONNECTED_NOTICE.to_owned());
        }

        if self.manual_close {
            self.state = SessionState::Idle;
            return CloseOutcome { decision: CloseDecision::Stopped, notices };
        }

        self.attempt = self.attempt.saturating_add(1);
        let max = self.policy.max_attempts;
        if self.attempt > max {
            self.state = SessionState::Idle;
            notices.push(exhausted_notice(max));
            return CloseOutcome { decision: CloseDecision::GiveUp { attempts: max }, notices };
        }

        self.state = SessionState::Reconnecting;
        let delay = self.policy.backoff.delay(self.attempt);
        notices.push(reconnecting_notice(delay, self.attempt, max));
        let decision = CloseDecision::Reconnect { attempt: self.attempt, delay };
        CloseOutcome { decision, notices }
    }

    /// The backoff delay elapsed. Returns false if the session was closed
    /// in the meantime and no attempt should be made.
    pub fn retry(&mut self) -> bool {
        if self.state != SessionState::Reconnecting || self.manual_close {
            return false;
        }
        self.state = SessionState::Connecting;
        true
    }

    /// Request a manual close. Returns true if a live transport must be
    /// closed; the eventual [`on_close`] will then report `Stopped`.
    ///
    /// [`on_close`]: Self::on_close
    pub fn close(&mut self) -> bool {
        self.manual_close = true;
        match self.state {
            SessionState::Connected | SessionState::Connecting => {
                self.state = SessionState::Closing;
                true
            }
            SessionState::Reconnecting => {
                self.state = SessionState::Idle;
                false
            }
            SessionState::Idle | SessionState::Closing => false,
        }
    }

    /// Sends are only allowed while connected.
    pub fn check_send(&self) -> Result<(), SendError> {
        match self.state {
            SessionState::Connected => Ok(()),
            other => Err(SendError::NotConnected(other)),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
