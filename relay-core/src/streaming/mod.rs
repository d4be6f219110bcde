//! Streaming of model answers.
//!
//! A [`StreamWorker`] owns one provider response at a time. It decodes the
//! event stream, lets the [`StreamGuard`] enforce cancellation and the time
//! ceiling, and queues throttled snapshots plus exactly one terminal update
//! for the publisher.

mod decoder;
mod guard;
mod worker;

pub use decoder::{decode_payload, DecodeError, DecodeStep, SnapshotThrottle, DONE_SENTINEL};
pub use guard::{with_notice, GuardState, StreamGuard};
pub use worker::{StreamOutcome, StreamRequest, StreamWorker};
