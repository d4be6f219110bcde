//! Stream worker: reads one provider response and turns it into queued
//! updates.
//!
//! The worker polls its guard between events, so a cancel or timeout is seen
//! within one poll interval even when the provider sends nothing.

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::decoder::{decode_payload, DecodeStep, SnapshotThrottle};
use super::guard::{with_notice, GuardState, StreamGuard};
use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::config::{NoticeConfig, StreamConfig};
use crate::error::ProviderError;
use crate::logging::{StreamEndEvent, StreamStartEvent, EVENT_TARGET};
use crate::models::{ChatCompletionRequest, ChatProvider, ConversationTurn};
use crate::publisher::{PartialUpdate, PersistenceRef, UpdateKind, UpdateSender};
use crate::types::Destination;

/// Everything a worker needs to run one stream. Owned by the worker.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub stream_id: Uuid,
    pub model_id: String,
    pub messages: Vec<ConversationTurn>,
    pub destination: Destination,
    pub token: CancellationToken,
    /// Attached to the `Completed` update only
    pub persistence: Option<PersistenceRef>,
}

impl StreamRequest {
    pub fn new(
        model_id: impl Into<String>,
        messages: Vec<ConversationTurn>,
        destination: Destination,
        token: CancellationToken,
    ) -> Self {
        Self {
            stream_id: Uuid::new_v4(),
            model_id: model_id.into(),
            messages,
            destination,
            token,
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: PersistenceRef) -> Self {
        self.persistence = Some(persistence);
        self
    }
}

/// How a stream ended.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub stream_id: Uuid,
    pub destination: Destination,
    pub state: GuardState,
    /// Accumulated answer text, without notices
    pub text: String,
    pub fragments: usize,
    pub snapshots: usize,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    text: String,
    fragments: usize,
    snapshots: usize,
}

/// Runs streams: reads the provider response, feeds the guard and the
/// throttle, and queues updates for the publisher.
#[derive(Clone)]
pub struct StreamWorker {
    provider: Arc<dyn ChatProvider>,
    sink: UpdateSender,
    clock: Arc<dyn Clock>,
    config: StreamConfig,
    notices: NoticeConfig,
}

impl StreamWorker {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        sink: UpdateSender,
        clock: Arc<dyn Clock>,
        config: StreamConfig,
        notices: NoticeConfig,
    ) -> Self {
        Self {
            provider,
            sink,
            clock,
            config,
            notices,
        }
    }

    /// Run `request` on its own task.
    pub fn spawn(&self, request: StreamRequest) -> JoinHandle<StreamOutcome> {
        let worker = self.clone();
        let span = tracing::info_span!("stream", stream_id = %request.stream_id, destination = %request.destination);
        tokio::spawn(async move { worker.run(request).await }.instrument(span))
    }

    /// Run one stream to its terminal state.
    ///
    /// Exactly one terminal update is queued for the destination, whichever
    /// way the stream ends. Errors never escape; they become a `Failed`
    /// update.
    pub async fn run(&self, request: StreamRequest) -> StreamOutcome {
        let StreamRequest {
            stream_id,
            model_id,
            messages,
            destination,
            token,
            persistence,
        } = request;

        info!(
            target: EVENT_TARGET,
            "{}",
            StreamStartEvent::new(stream_id, &model_id, destination, messages.len())
        );

        let mut guard = StreamGuard::new(
            token,
            Arc::clone(&self.clock),
            self.config.timeout(),
            destination,
            self.sink.clone(),
            &self.notices,
        );
        let mut progress = Progress::default();
        let body = ChatCompletionRequest::streaming(model_id, messages);
        let failure = self.pump(&body, destination, &mut guard, &mut progress).await;

        let error = failure.as_ref().map(|e| e.to_string());
        if let Some(e) = failure {
            if guard.fail() {
                warn!(%destination, error = %e, "Stream failed");
                let notice = format!("{}: {}", self.notices.error_prefix, e);
                self.emit(PartialUpdate::terminal(
                    destination,
                    with_notice(&progress.text, &notice),
                    UpdateKind::Failed,
                ))
                .await;
            }
        } else if guard.complete() {
            self.emit(
                PartialUpdate::terminal(destination, progress.text.clone(), UpdateKind::Completed)
                    .with_persistence(persistence),
            )
            .await;
        }

        let outcome = StreamOutcome {
            stream_id,
            destination,
            state: guard.state(),
            text: progress.text,
            fragments: progress.fragments,
            snapshots: progress.snapshots,
            elapsed: guard.elapsed(),
            error,
        };
        info!(
            target: EVENT_TARGET,
            "{}",
            StreamEndEvent::new(
                stream_id,
                outcome.state.as_str(),
                outcome.text.chars().count(),
                outcome.elapsed.as_millis()
            )
            .with_counts(outcome.fragments, outcome.snapshots)
            .with_error(outcome.error.clone())
        );
        outcome
    }

    /// Read the response until it ends, fails or the guard stops it.
    ///
    /// Returns the provider failure, if any. Dropping the response on return
    /// closes the connection.
    async fn pump(
        &self,
        request: &ChatCompletionRequest,
        destination: Destination,
        guard: &mut StreamGuard,
        progress: &mut Progress,
    ) -> Option<ProviderError> {
        let poll = self.config.poll_interval();

        let open = self.provider.open_stream(request);
        tokio::pin!(open);
        let body = loop {
            if guard.check(&progress.text).await.is_terminal() {
                return None;
            }
            match timeout(poll, &mut open).await {
                Ok(Ok(body)) => break body,
                Ok(Err(e)) => return Some(e),
                Err(_) => continue,
            }
        };
        debug!(provider = self.provider.name(), "Response stream opened");

        let mut events = body.eventsource();
        let mut throttle = SnapshotThrottle::new(self.config.update_interval(), guard.started());
        loop {
            if guard.check(&progress.text).await.is_terminal() {
                return None;
            }
            if let Some(snapshot) = throttle.offer(self.clock.now(), &progress.text) {
                let update = PartialUpdate::partial(destination, snapshot);
                // a full queue must not hold off cancellation; the next check queues the terminal
                tokio::select! {
                    biased;
                    _ = guard.cancelled() => debug!("Snapshot dropped, stream cancelled"),
                    sent = self.sink.send(update) => match sent {
                        Ok(()) => progress.snapshots += 1,
                        Err(e) => warn!(error = %e, "Could not queue update"),
                    },
                }
            }

            let event = match timeout(poll, events.next()).await {
                Err(_) => continue,
                Ok(None) => {
                    debug!("Response stream ended without a done marker");
                    return None;
                }
                Ok(Some(Err(EventStreamError::Transport(e)))) => return Some(e),
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Skipping unreadable stream event");
                    continue;
                }
                Ok(Some(Ok(event))) => event,
            };

            match decode_payload(&event.data) {
                Ok(DecodeStep::Done) => return None,
                Ok(DecodeStep::Delta(fragment)) => {
                    progress.text.push_str(&fragment);
                    progress.fragments += 1;
                }
                Ok(DecodeStep::Tick) => {}
                Ok(DecodeStep::Error(e)) => return Some(e),
                Err(e) => warn!(error = %e, "Skipping malformed stream event"),
            }
        }
    }

    async fn emit(&self, update: PartialUpdate) {
        if let Err(e) = self.sink.send(update).await {
            warn!(error = %e, "Could not queue update");
        }
    }
}

impl std::fmt::Debug for StreamWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWorker")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}
