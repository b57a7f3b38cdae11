// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared publish/subscribe medium joining server processes into one room.

pub mod local;
pub mod nats;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

pub use local::{LocalBackbone, LocalHub};
pub use nats::NatsBackbone;

/// Stream of raw payloads received on a channel. Ends when the
/// subscription is lost.
pub type Feed = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// A broadcast transport. Every subscriber of a channel, including the
/// publisher itself, receives each published payload.
pub trait Backbone: Send + Sync + 'static {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Feed>> + Send + 'a>>;

    /// Whether the backbone link is currently up.
    fn is_connected(&self) -> bool;

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}
