// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::backoff::Backoff;

/// Configuration for `chatfan serve`.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "CHATFAN_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "CHATFAN_PORT")]
    pub port: u16,

    /// NATS server URL. If unset, messages stay within this process.
    #[arg(long, env = "CHATFAN_NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS auth token.
    #[arg(long, env = "CHATFAN_NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// Broadcast channel (NATS subject) shared by every instance.
    #[arg(long, default_value = "chat.messages", env = "CHATFAN_CHANNEL")]
    pub channel: String,

    /// Default history window replayed to new connections, in minutes.
    #[arg(long, default_value_t = 30, env = "CHATFAN_HISTORY_MINUTES")]
    pub history_minutes: u32,

    /// Longest history window that can be requested, in minutes.
    #[arg(long, default_value_t = 1440, env = "CHATFAN_HISTORY_RETENTION_MINUTES")]
    pub history_retention_minutes: u32,

    /// Maximum number of messages kept in history.
    #[arg(long, default_value_t = 10_000, env = "CHATFAN_HISTORY_CAPACITY")]
    pub history_capacity: usize,

    /// Do not record messages from other instances into local history.
    #[arg(long, env = "CHATFAN_NO_HISTORY_MIRROR")]
    pub no_history_mirror: bool,

    /// Frames buffered per connection before it is dropped as a slow consumer.
    #[arg(long, default_value_t = 256, env = "CHATFAN_OUTBOUND_CAPACITY")]
    pub outbound_capacity: usize,

    /// Maximum message text length in bytes.
    #[arg(long, default_value_t = 4096, env = "CHATFAN_MAX_MESSAGE_LEN")]
    pub max_message_len: usize,

    /// Upper bound on one in-band history frame, in bytes. Larger windows are
    /// split across several frames.
    #[arg(long, default_value_t = 1_048_576, env = "CHATFAN_HISTORY_FRAME_BYTES")]
    pub history_frame_bytes: usize,

    /// Interval between server pings on each connection.
    #[arg(long, default_value_t = 25_000, env = "CHATFAN_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// Close connections that have sent nothing (pongs included) for this long.
    #[arg(long, default_value_t = 60_000, env = "CHATFAN_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Time allowed for a close frame to flush during teardown.
    #[arg(long, default_value_t = 1000, env = "CHATFAN_CLOSE_TIMEOUT_MS")]
    pub close_timeout_ms: u64,

    /// Initial bridge resubscribe delay in milliseconds.
    #[arg(long, default_value_t = 1000, env = "CHATFAN_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    /// Maximum bridge resubscribe delay in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "CHATFAN_BACKOFF_CAP_MS")]
    pub backoff_cap_ms: u64,

    /// Identifier stamped on backbone records. Random if unset.
    #[arg(long, env = "CHATFAN_INSTANCE_ID")]
    pub instance_id: Option<String>,
}

impl ServerConfig {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.history_retention_minutes == 0 {
            anyhow::bail!("--history-retention-minutes must be at least 1");
        }
        if self.history_minutes > self.history_retention_minutes {
            anyhow::bail!(
                "--history-minutes ({}) exceeds --history-retention-minutes ({})",
                self.history_minutes,
                self.history_retention_minutes
            );
        }
        if self.history_capacity == 0 {
            anyhow::bail!("--history-capacity must be at least 1");
        }
        if self.outbound_capacity == 0 {
            anyhow::bail!("--outbound-capacity must be at least 1");
        }
        if self.max_message_len == 0 {
            anyhow::bail!("--max-message-len must be at least 1");
        }
        if self.history_frame_bytes == 0 {
            anyhow::bail!("--history-frame-bytes must be at least 1");
        }
        if self.ping_interval_ms == 0 {
            anyhow::bail!("--ping-interval-ms must be at least 1");
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            anyhow::bail!(
                "--idle-timeout-ms ({}) must exceed --ping-interval-ms ({})",
                self.idle_timeout_ms,
                self.ping_interval_ms
            );
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            anyhow::bail!(
                "--backoff-base-ms ({}) exceeds --backoff-cap-ms ({})",
                self.backoff_base_ms,
                self.backoff_cap_ms
            );
        }
        if self.channel.trim().is_empty() {
            anyhow::bail!("--channel must not be empty");
        }
        Ok(())
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.history_retention_minutes) * 60)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.backoff_base_ms, self.backoff_cap_ms)
    }

    pub fn mirror_history(&self) -> bool {
        !self.no_history_mirror
    }

    /// Configuration with production defaults, bound to an ephemeral port.
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            nats_url: None,
            nats_token: None,
            channel: "chat.messages".to_owned(),
            history_minutes: 30,
            history_retention_minutes: 1440,
            history_capacity: 10_000,
            no_history_mirror: false,
            outbound_capacity: 256,
            max_message_len: 4096,
            history_frame_bytes: 1_048_576,
            ping_interval_ms: 25_000,
            idle_timeout_ms: 60_000,
            close_timeout_ms: 1000,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            instance_id: None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
