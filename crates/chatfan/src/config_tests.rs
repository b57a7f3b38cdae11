// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

#[derive(Parser)]
struct Wrapper {
    #[command(flatten)]
    config: ServerConfig,
}

#[test]
fn defaults_match_test_config() -> anyhow::Result<()> {
    let parsed = Wrapper::try_parse_from(["chatfan"])?.config;
    let expected = ServerConfig { port: 8080, ..ServerConfig::test() };
    assert_eq!(format!("{parsed:?}"), format!("{expected:?}"));
    parsed.validate()?;
    Ok(())
}

#[test]
fn flags_override_defaults() -> anyhow::Result<()> {
    let parsed = Wrapper::try_parse_from([
        "chatfan",
        "--port",
        "9000",
        "--nats-url",
        "nats://localhost:4222",
        "--history-minutes",
        "5",
        "--no-history-mirror",
    ])?
    .config;
    assert_eq!(parsed.port, 9000);
    assert_eq!(parsed.nats_url.as_deref(), Some("nats://localhost:4222"));
    assert_eq!(parsed.history_minutes, 5);
    assert!(!parsed.mirror_history());
    Ok(())
}

#[yare::parameterized(
    window_beyond_retention = { |c: &mut ServerConfig| c.history_minutes = 1441 },
    zero_retention = { |c: &mut ServerConfig| { c.history_retention_minutes = 0; c.history_minutes = 0 } },
    zero_capacity = { |c: &mut ServerConfig| c.history_capacity = 0 },
    zero_outbox = { |c: &mut ServerConfig| c.outbound_capacity = 0 },
    zero_message_len = { |c: &mut ServerConfig| c.max_message_len = 0 },
    zero_frame_bytes = { |c: &mut ServerConfig| c.history_frame_bytes = 0 },
    zero_ping_interval = { |c: &mut ServerConfig| c.ping_interval_ms = 0 },
    idle_within_ping = { |c: &mut ServerConfig| c.idle_timeout_ms = 25_000 },
    base_above_cap = { |c: &mut ServerConfig| c.backoff_base_ms = 60_000 },
    blank_channel = { |c: &mut ServerConfig| c.channel = "  ".to_owned() },
)]
fn invalid_configs_are_rejected(tweak: fn(&mut ServerConfig)) {
    let mut config = ServerConfig::test();
    tweak(&mut config);
    assert!(config.validate().is_err());
}

#[test]
fn derived_durations() {
    let config = ServerConfig::test();
    assert_eq!(config.history_retention(), Duration::from_secs(86_400));
    assert_eq!(config.close_timeout(), Duration::from_secs(1));
    assert_eq!(config.ping_interval(), Duration::from_secs(25));
    assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    assert_eq!(config.backoff(), Backoff::default());
}
