//! Cancellation and time-ceiling guard for a running stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::config::NoticeConfig;
use crate::publisher::{PartialUpdate, UpdateKind, UpdateSender};
use crate::types::Destination;

/// Lifecycle of one stream. Every state but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardState {
    Running,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

impl GuardState {
    pub fn is_terminal(self) -> bool {
        self != GuardState::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GuardState::Running => "Running",
            GuardState::Completed => "Completed",
            GuardState::Failed => "Failed",
            GuardState::Canceled => "Canceled",
            GuardState::TimedOut => "TimedOut",
        }
    }
}

impl std::fmt::Display for GuardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append a notice to partial answer text.
pub fn with_notice(text: &str, notice: &str) -> String {
    if text.trim().is_empty() {
        notice.to_string()
    } else {
        format!("{}\n\n{}", text, notice)
    }
}

/// Watches a stream for cancellation and its time ceiling.
///
/// The first transition out of `Running` wins. When the guard itself ends the
/// stream (cancel or timeout) it also queues the terminal update, so the
/// worker only has to stop reading.
#[derive(Debug)]
pub struct StreamGuard {
    token: CancellationToken,
    clock: Arc<dyn Clock>,
    started: Instant,
    ceiling: Duration,
    state: GuardState,
    destination: Destination,
    sink: UpdateSender,
    canceled_notice: String,
    timed_out_notice: String,
}

impl StreamGuard {
    pub fn new(
        token: CancellationToken,
        clock: Arc<dyn Clock>,
        ceiling: Duration,
        destination: Destination,
        sink: UpdateSender,
        notices: &NoticeConfig,
    ) -> Self {
        let started = clock.now();
        Self {
            token,
            clock,
            started,
            ceiling,
            state: GuardState::Running,
            destination,
            sink,
            canceled_notice: notices.canceled.clone(),
            timed_out_notice: notices.timed_out.clone(),
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed_since(self.started)
    }

    /// Resolves once the stream's token is cancelled.
    pub async fn cancelled(&self) {
        self.token.wait_for_cancellation().await
    }

    /// Evaluate the guard against the text accumulated so far.
    pub async fn check(&mut self, accumulated: &str) -> GuardState {
        if self.state.is_terminal() {
            return self.state;
        }

        let (next, kind, notice) = if self.token.is_cancelled() {
            (GuardState::Canceled, UpdateKind::Canceled, &self.canceled_notice)
        } else if self.elapsed() >= self.ceiling {
            (GuardState::TimedOut, UpdateKind::TimedOut, &self.timed_out_notice)
        } else {
            return GuardState::Running;
        };
        self.state = next;
        info!(destination = %self.destination, state = %next, elapsed_ms = self.elapsed().as_millis() as u64, "Stream stopped");

        let update = PartialUpdate::terminal(self.destination, with_notice(accumulated, notice), kind);
        if let Err(e) = self.sink.send(update).await {
            warn!(destination = %self.destination, error = %e, "Could not queue terminal update");
        }
        next
    }

    /// Mark the stream completed. False if it already ended.
    pub fn complete(&mut self) -> bool {
        self.transition(GuardState::Completed)
    }

    /// Mark the stream failed. False if it already ended.
    pub fn fail(&mut self) -> bool {
        self.transition(GuardState::Failed)
    }

    fn transition(&mut self, next: GuardState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }
}
