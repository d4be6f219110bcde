use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::types::Destination;

/// Target for structured lifecycle events.
pub const EVENT_TARGET: &str = "relay_core.events";

/// Install a `tracing-subscriber` formatter filtered by `filter`
/// (`RUST_LOG` syntax, e.g. `"relay_core=debug"`).
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(filter: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|e| RelayError::with_source("Invalid log filter", e))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| RelayError::other(format!("Failed to install tracing subscriber: {}", e)))
}

/// Event for logging the start of a completion stream
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamStartEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub stream_id: Uuid,
    pub model: String,
    pub destination: String,
    pub messages: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl StreamStartEvent {
    pub fn new(stream_id: Uuid, model: &str, destination: Destination, messages: usize) -> Self {
        Self {
            event_type: "StreamStart".to_string(),
            stream_id,
            model: model.to_string(),
            destination: destination.to_string(),
            messages,
            timestamp: Utc::now(),
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: String, value: Value) -> Self {
        self.extra.insert(key, value);
        self
    }
}

impl std::fmt::Display for StreamStartEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "StreamStartEvent serialization error"),
        }
    }
}

/// Event for logging the terminal state of a completion stream
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamEndEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub stream_id: Uuid,
    pub state: String,
    pub fragments: usize,
    pub snapshots: usize,
    pub answer_chars: usize,
    pub elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl StreamEndEvent {
    pub fn new(stream_id: Uuid, state: &str, answer_chars: usize, elapsed_ms: u128) -> Self {
        Self {
            event_type: "StreamEnd".to_string(),
            stream_id,
            state: state.to_string(),
            fragments: 0,
            snapshots: 0,
            answer_chars,
            elapsed_ms,
            error: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_counts(mut self, fragments: usize, snapshots: usize) -> Self {
        self.fragments = fragments;
        self.snapshots = snapshots;
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_extra(mut self, key: String, value: Value) -> Self {
        self.extra.insert(key, value);
        self
    }
}

impl std::fmt::Display for StreamEndEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "StreamEndEvent serialization error"),
        }
    }
}
