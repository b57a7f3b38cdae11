// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat message envelope and the frames exchanged with browsers.
//!
//! Inbound frames are parsed with an explicit two-branch policy: a JSON
//! object is treated as a structured envelope, anything else is legacy raw
//! text. The ingestion point always assigns the timestamp; a client-supplied
//! `ts` is ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag describing what a [`Message`] is.
///
/// Only `chat` travels between processes today. The tag is open so system
/// notices (`connected`, `disconnected`, `reconnecting`) and future kinds
/// round-trip without loss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    #[default]
    Chat,
    Connected,
    Disconnected,
    Reconnecting,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "chat" => Self::Chat,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "reconnecting" => Self::Reconnecting,
            _ => Self::Other(tag),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted chat message. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    /// Milliseconds since the Unix epoch, assigned at ingestion.
    pub ts: u64,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl Message {
    pub fn chat(text: impl Into<String>, ts: u64) -> Self {
        Self { text: text.into(), ts, kind: MessageKind::Chat }
    }
}

/// Why an inbound payload was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingText,
    UnsupportedKind,
    TooLong,
}

impl ParseError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::MissingText => "missing_text",
            Self::UnsupportedKind => "unsupported_kind",
            Self::TooLong => "too_long",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ParseError {}

/// Parse an inbound text frame into a [`Message`] stamped with `now_ms`.
///
/// `max_len` bounds the text in bytes.
pub fn ingest(raw: &str, now_ms: u64, max_len: usize) -> Result<Message, ParseError> {
    let text = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(obj)) => {
            if let Some(tag) = obj.get("type") {
                if tag.as_str() != Some(MessageKind::Chat.as_str()) {
                    return Err(ParseError::UnsupportedKind);
                }
            }
            match obj.get("text").and_then(|t| t.as_str()) {
                Some(t) => t.to_owned(),
                None => return Err(ParseError::MissingText),
            }
        }
        Ok(serde_json::Value::String(s)) => s,
        _ => raw.to_owned(),
    };

    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    if text.len() > max_len {
        return Err(ParseError::TooLong);
    }
    Ok(Message::chat(text, now_ms))
}

/// A message as rendered to clients, both in history batches and over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}

impl From<&Message> for HistoryEntry {
    fn from(msg: &Message) -> Self {
        Self { text: msg.text.clone(), ts: Some(msg.ts) }
    }
}

/// Marker for the `type` field of a history batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchTag {
    History,
}

/// Server → client frame.
///
/// Untagged so live frames stay `{text, ts}` and notices stay bare strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    History {
        #[serde(rename = "type")]
        tag: BatchTag,
        messages: Vec<HistoryEntry>,
        /// Set on every chunk of a split batch except the last.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        more: bool,
    },
    Live {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<u64>,
    },
    Notice(String),
}

impl ServerFrame {
    pub fn live(msg: &Message) -> Self {
        Self::Live { text: msg.text.clone(), ts: Some(msg.ts) }
    }

    pub fn history(messages: &[Message]) -> Self {
        Self::History {
            tag: BatchTag::History,
            messages: messages.iter().map(HistoryEntry::from).collect(),
            more: false,
        }
    }

    /// Split a history window into batches whose JSON stays within
    /// `max_bytes`, so no single frame outgrows a client's frame limit.
    ///
    /// An empty window yields one empty batch. An entry too large for
    /// `max_bytes` on its own is sent alone.
    pub fn history_chunks(messages: &[Message], max_bytes: usize) -> Vec<Self> {
        const OVERHEAD: usize = r#"{"type":"history","messages":[],"more":true}"#.len();

        let mut batches = Vec::new();
        let mut batch = Vec::new();
        let mut size = OVERHEAD;
        for msg in messages {
            let entry = HistoryEntry::from(msg);
            // One extra byte for the separating comma.
            let len = serde_json::to_string(&entry).map(|s| s.len()).unwrap_or_default() + 1;
            if !batch.is_empty() && size + len > max_bytes {
                batches.push(std::mem::take(&mut batch));
                size = OVERHEAD;
            }
            size += len;
            batch.push(entry);
        }
        batches.push(batch);

        let last = batches.len() - 1;
        batches
            .into_iter()
            .enumerate()
            .map(|(i, messages)| Self::History { tag: BatchTag::History, messages, more: i < last })
            .collect()
    }

    pub fn to_json(&self) -> String {
        // Serializing these shapes cannot fail: string keys, no maps.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
