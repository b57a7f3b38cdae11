// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS core pub/sub backbone.
//!
//! The channel name is used as the subject. async-nats reconnects on its own;
//! while it is down `is_connected` reports false so the bridge falls back to
//! local delivery instead of queueing into the client buffer.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{Backbone, Feed};

/// Backbone over a NATS connection.
#[derive(Debug, Clone)]
pub struct NatsBackbone {
    client: async_nats::Client,
}

impl NatsBackbone {
    /// Connect to `url`. The initial connection is retried in the
    /// background, so this returns even when the server is not yet up.
    pub async fn connect(url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        let mut opts = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("nats connected"),
                    async_nats::Event::Disconnected => warn!("nats disconnected"),
                    other => debug!(event = %other, "nats event"),
                }
            });
        if let Some(token) = token {
            opts = opts.token(token.to_owned());
        }

        info!(url, "connecting nats backbone");
        let client = opts.connect(url).await?;
        Ok(Self { client })
    }
}

impl Backbone for NatsBackbone {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.client.publish(channel.to_owned(), payload).await?;
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Feed>> + Send + 'a>> {
        Box::pin(async move {
            let sub = self.client.subscribe(channel.to_owned()).await?;
            let feed: Feed = Box::pin(sub.map(|msg| msg.payload));
            Ok(feed)
        })
    }

    fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), async_nats::connection::State::Connected)
    }

    fn kind(&self) -> &'static str {
        "nats"
    }
}
