// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: health, history retrieval, and metrics.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::envelope::HistoryEntry;
use crate::error::ErrorCode;
use crate::state::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub backbone: String,
    pub instance: String,
}

/// `minutes` is kept as text so malformed values get a precise 400.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub minutes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<HistoryEntry>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health` (also `/healthz`)
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let subscribed = s.bridge.is_subscribed();
    let status = if subscribed { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = HealthResponse {
        status: "running".to_owned(),
        connections: s.registry.len(),
        backbone: if subscribed { "connected" } else { "disconnected" }.to_owned(),
        instance: s.instance.clone(),
    };
    (status, Json(body))
}

/// `GET /api/v1/messages?minutes=N`: recent history, oldest first.
pub async fn messages(
    State(s): State<Arc<AppState>>,
    Query(q): Query<MessagesQuery>,
) -> Response {
    let retention = s.config.history_retention_minutes;
    let minutes = match parse_minutes(q.minutes.as_deref(), s.config.history_minutes, retention) {
        Ok(m) => m,
        Err(message) => return ErrorCode::BadRequest.to_http_response(message).into_response(),
    };

    match s.history.query(minutes) {
        Ok(messages) => Json(MessagesResponse {
            messages: messages.iter().map(HistoryEntry::from).collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(err = %e, minutes, "history query failed");
            s.observer.history_error();
            ErrorCode::Internal.to_http_response("failed to load message history").into_response()
        }
    }
}

/// `GET /api/v1/metrics`
pub async fn metrics(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.counters.snapshot())
}

/// Validate the `minutes` parameter against the retention horizon.
pub fn parse_minutes(raw: Option<&str>, default: u32, retention: u32) -> Result<u32, String> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let n: i64 = raw.trim().parse().map_err(|_| "minutes is not a valid integer".to_owned())?;
    if n <= 0 {
        return Err("minutes must be a positive number".to_owned());
    }
    if n > i64::from(retention) {
        return Err(format!("minutes cannot be more than {retention} minutes"));
    }
    Ok(n as u32)
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
