//! Decoding of the completion event stream.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::ProviderError;
use crate::models::StreamChunk;

/// Payload that ends a stream normally.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What one `data:` payload contributes to the stream.
#[derive(Debug)]
pub enum DecodeStep {
    /// The provider signalled the end of the answer
    Done,
    /// A new fragment of answer text
    Delta(String),
    /// A well-formed payload without answer text
    Tick,
    /// The provider reported an error in-band
    Error(ProviderError),
}

/// A single event that could not be decoded. Skipped, never fatal.
#[derive(Debug, Error)]
#[error("malformed stream payload ({payload}): {source}")]
pub struct DecodeError {
    pub payload: String,
    #[source]
    pub source: serde_json::Error,
}

/// Decode one event payload.
///
/// # Examples
/// ```
/// use relay_core::streaming::{decode_payload, DecodeStep};
///
/// let step = decode_payload(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
/// assert!(matches!(step, DecodeStep::Delta(text) if text == "Hel"));
/// assert!(matches!(decode_payload("[DONE]").unwrap(), DecodeStep::Done));
/// ```
pub fn decode_payload(data: &str) -> Result<DecodeStep, DecodeError> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(DecodeStep::Done);
    }
    if data.is_empty() {
        return Ok(DecodeStep::Tick);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|source| DecodeError {
        payload: data.chars().take(200).collect(),
        source,
    })?;
    if let Some(message) = chunk.error_message() {
        return Ok(DecodeStep::Error(ProviderError::Api { message }));
    }
    match chunk.content_fragment() {
        Some(fragment) if !fragment.is_empty() => Ok(DecodeStep::Delta(fragment.to_string())),
        _ => Ok(DecodeStep::Tick),
    }
}

/// Decides when accumulated text is worth republishing.
///
/// A snapshot is offered only when text grew since the previous offer and
/// at least `min_interval` passed since then. The stream start counts as the
/// first offer.
#[derive(Debug, Clone)]
pub struct SnapshotThrottle {
    min_interval: Duration,
    last_offer_at: Instant,
    offered_len: usize,
}

impl SnapshotThrottle {
    pub fn new(min_interval: Duration, started: Instant) -> Self {
        Self {
            min_interval,
            last_offer_at: started,
            offered_len: 0,
        }
    }

    /// Return a snapshot of `accumulated` if one is due at `now`.
    pub fn offer(&mut self, now: Instant, accumulated: &str) -> Option<String> {
        // accumulated text only ever grows, so its length identifies it
        if accumulated.len() == self.offered_len {
            return None;
        }
        if now.saturating_duration_since(self.last_offer_at) < self.min_interval {
            return None;
        }
        self.last_offer_at = now;
        self.offered_len = accumulated.len();
        Some(accumulated.to_string())
    }
}
