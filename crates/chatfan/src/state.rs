// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backbone::Backbone;
use crate::bridge::{Bridge, BridgeConfig};
use crate::config::ServerConfig;
use crate::history::HistoryStore;
use crate::observer::{Counters, Observer};
use crate::registry::Registry;

/// Everything a request or connection handler needs, shared per process.
pub struct AppState {
    pub config: ServerConfig,
    pub instance: String,
    pub registry: Arc<Registry>,
    pub history: Arc<dyn HistoryStore>,
    pub bridge: Arc<Bridge>,
    pub counters: Arc<Counters>,
    pub observer: Arc<dyn Observer>,
    pub shutdown: CancellationToken,
    /// Live connection tasks, drained on shutdown.
    pub connections: TaskTracker,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        backbone: Arc<dyn Backbone>,
        history: Arc<dyn HistoryStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let instance =
            config.instance_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let registry = Arc::new(Registry::new());
        let counters = Arc::new(Counters::new());
        let observer: Arc<dyn Observer> = counters.clone();
        let bridge = Bridge::new(
            backbone,
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&observer),
            BridgeConfig {
                channel: config.channel.clone(),
                instance: instance.clone(),
                mirror_history: config.mirror_history(),
                backoff: config.backoff(),
            },
        );

        Self {
            config,
            instance,
            registry,
            history,
            bridge,
            counters,
            observer,
            shutdown,
            connections: TaskTracker::new(),
        }
    }
}
