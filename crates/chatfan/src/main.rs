// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use chatfan::backoff::Backoff;
use chatfan::client::{ChatClient, ClientConfig, ClientEvent, ReconnectPolicy, SessionEnd};
use chatfan::config::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "chatfan", version, about = "Multi-instance real-time chat fan-out.")]
struct Cli {
    /// Log format (json or text).
    #[arg(long, global = true, default_value = "json", env = "CHATFAN_LOG_FORMAT")]
    log_format: String,

    /// Log level filter.
    #[arg(long, global = true, default_value = "info", env = "CHATFAN_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a chat server instance.
    Serve(ServerConfig),
    /// Connect to a server and chat from stdin.
    Client(ClientArgs),
}

#[derive(Debug, clap::Args)]
struct ClientArgs {
    /// Server base URL, e.g. http://127.0.0.1:8080.
    url: String,

    /// History window fetched on first connect, in minutes.
    #[arg(long, default_value_t = 30)]
    history_minutes: u32,

    /// Give up on the out-of-band history request after this long.
    #[arg(long, default_value_t = 10_000)]
    history_timeout_ms: u64,

    /// Reconnect attempts before giving up.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    #[arg(long, default_value_t = 1000)]
    backoff_base_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    backoff_cap_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_format, &cli.log_level);

    let result = match cli.command {
        Command::Serve(config) => {
            if let Err(e) = config.validate() {
                error!("invalid configuration: {e:#}");
                std::process::exit(2);
            }
            chatfan::run(config).await
        }
        Command::Client(args) => run_client(args).await,
    };

    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(log_format: &str, log_level: &str) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

/// Interactive client: stdin lines are sent, events are printed to stdout.
async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let (client, mut events) = ChatClient::spawn(ClientConfig {
        url: args.url,
        history_minutes: args.history_minutes,
        history_timeout: Duration::from_millis(args.history_timeout_ms),
        policy: ReconnectPolicy {
            backoff: Backoff::from_millis(args.backoff_base_ms, args.backoff_cap_ms),
            max_attempts: args.max_attempts,
        },
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = client.send(&line) {
                        eprintln!("[not sent: {e}]");
                    }
                }
                None => {
                    stdin_open = false;
                    client.close();
                }
            },
            event = events.recv() => match event {
                Some(ClientEvent::Notice(notice)) => println!("{notice}"),
                Some(ClientEvent::History(entries)) => {
                    for entry in entries {
                        println!("{}", entry.text);
                    }
                }
                Some(ClientEvent::Message(entry)) => println!("{}", entry.text),
                Some(ClientEvent::Ended(SessionEnd::GaveUp { attempts })) => {
                    anyhow::bail!("gave up after {attempts} reconnection attempts");
                }
                Some(ClientEvent::Ended(SessionEnd::Closed)) | None => break,
            },
        }
    }

    client.join().await;
    Ok(())
}
