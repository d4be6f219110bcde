//! Relay entry point: handles user messages, regenerate and cancel requests,
//! and starts one stream per answer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{ActiveStream, ActiveStreams, ChatSession, SessionRegistry};
use crate::cancellation::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::error::{ConfigError, RelayError, Result};
use crate::model_context::{ContextWindow, ContextWindowBuilder};
use crate::models::{ChatProvider, ConversationTurn};
use crate::publisher::{update_queue, PersistenceRef, UpdatePublisher, UpdateSender};
use crate::store::{ConversationStore, NewTurn};
use crate::streaming::{StreamOutcome, StreamRequest, StreamWorker};
use crate::transport::{ChatTransport, Controls};
use crate::types::{ChatId, Destination, DialogId, UserId};

/// Builder for [`RelayOrchestrator`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use relay_core::{InMemoryConversationStore, OpenRouterProvider, RelayBuilder, RelayConfig};
/// # use relay_core::transport::ChatTransport;
///
/// # async fn example(transport: Arc<dyn ChatTransport>) -> relay_core::Result<()> {
/// let config = RelayConfig::load(None)?;
/// let relay = RelayBuilder::new(config.clone())
///     .provider(Arc::new(OpenRouterProvider::new(&config.provider)?))
///     .transport(transport)
///     .store(Arc::new(InMemoryConversationStore::new()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RelayBuilder {
    config: RelayConfig,
    provider: Option<Arc<dyn ChatProvider>>,
    transport: Option<Arc<dyn ChatTransport>>,
    store: Option<Arc<dyn ConversationStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            provider: None,
            transport: None,
            store: None,
            clock: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and start the update publisher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<RelayOrchestrator> {
        self.config.validate()?;
        let provider = self.provider.ok_or_else(|| missing("provider"))?;
        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let store = self.store.ok_or_else(|| missing("store"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;

        let sessions = SessionRegistry::new();
        let active = ActiveStreams::new();
        let (updates, receiver) = update_queue(config.publisher.queue_capacity);
        let shutdown = CancellationToken::new();

        let publisher = UpdatePublisher::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            sessions.clone(),
            active.clone(),
            config.publisher.clone(),
            config.notices.clone(),
            Arc::clone(&clock),
        );
        let publisher_task = tokio::spawn(publisher.run(receiver, shutdown.clone()));

        let worker = StreamWorker::new(
            provider,
            updates.clone(),
            clock,
            config.stream.clone(),
            config.notices.clone(),
        );

        Ok(RelayOrchestrator {
            windows: ContextWindowBuilder::new(config.context.clone()),
            config,
            transport,
            store,
            sessions,
            active,
            worker,
            updates,
            shutdown,
            publisher: Mutex::new(Some(publisher_task)),
            streams: Mutex::new(Vec::new()),
        })
    }
}

fn missing(key: &str) -> RelayError {
    ConfigError::MissingRequired {
        key: key.to_string(),
    }
    .into()
}

/// Result of an inbound request.
#[derive(Debug)]
pub enum RelayOutcome {
    /// A stream was started
    Started(RelayTicket),
    /// The chat has no model yet; a notice was sent instead
    ModelNotSelected,
    /// Nothing was asked in this dialog yet
    NothingToRegenerate,
}

impl RelayOutcome {
    pub fn into_ticket(self) -> Option<RelayTicket> {
        match self {
            RelayOutcome::Started(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// Handle on a started stream.
#[derive(Debug)]
pub struct RelayTicket {
    pub destination: Destination,
    pub usage_percent: f64,
    pub suggest_new_dialog: bool,
    pub dropped_turns: usize,
    outcome: oneshot::Receiver<StreamOutcome>,
    finalized: oneshot::Receiver<()>,
    updates: UpdateSender,
}

impl RelayTicket {
    /// Wait for the stream's terminal state and for its terminal update to
    /// be published.
    ///
    /// Updates of other chats still in the queue do not hold this up. If the
    /// publisher goes away without finalizing the destination, this returns
    /// once the queue is idle.
    pub async fn wait(self) -> Result<StreamOutcome> {
        let outcome = self
            .outcome
            .await
            .map_err(|_| RelayError::other("stream worker stopped before reporting an outcome"))?;
        tokio::select! {
            Ok(()) = self.finalized => {}
            _ = self.updates.join() => {}
        }
        Ok(outcome)
    }
}

/// Entry point of the relay: turns user messages into streamed answers.
pub struct RelayOrchestrator {
    config: RelayConfig,
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn ConversationStore>,
    sessions: SessionRegistry,
    active: ActiveStreams,
    windows: ContextWindowBuilder,
    worker: StreamWorker,
    updates: UpdateSender,
    shutdown: CancellationToken,
    publisher: Mutex<Option<JoinHandle<()>>>,
    streams: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayOrchestrator {
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn active_streams(&self) -> &ActiveStreams {
        &self.active
    }

    /// The update queue; `join()` on it waits until the publisher is idle.
    pub fn updates(&self) -> &UpdateSender {
        &self.updates
    }

    /// Choose the model for a chat. Starts a new dialog.
    pub async fn select_model(
        &self,
        user: UserId,
        chat: ChatId,
        model_id: impl Into<String>,
    ) -> Result<DialogId> {
        let model_id = model_id.into();
        let dialog = self.store.next_dialog_sequence(user).await?;
        info!(%chat, %user, model = %model_id, %dialog, "Model selected");
        self.sessions.insert(chat, ChatSession::new(user, model_id, dialog));
        Ok(dialog)
    }

    /// Start a new dialog with the current model. `None` if no model is
    /// selected.
    pub async fn reset_dialog(&self, chat: ChatId) -> Result<Option<DialogId>> {
        let Some(session) = self.sessions.get(chat) else {
            return Ok(None);
        };
        let dialog = self.store.next_dialog_sequence(session.user_id).await?;
        self.sessions.update(chat, |session| {
            session.dialog = dialog;
            session.last_question = None;
            session.current_record = None;
            session.answer_message = None;
        });
        info!(%chat, %dialog, "Dialog reset");
        Ok(Some(dialog))
    }

    /// Relay one user message to the model and stream the answer back.
    ///
    /// A stream already running for the chat is cancelled and replaced.
    pub async fn handle_user_message(
        &self,
        user: UserId,
        chat: ChatId,
        text: &str,
    ) -> Result<RelayOutcome> {
        let Some(session) = self.session_or_notice(chat).await? else {
            return Ok(RelayOutcome::ModelNotSelected);
        };

        let history = self
            .store
            .fetch_history(session.user_id, session.dialog, None)
            .await?;
        let window = self.build_window(&session, &history, text).await;

        let record = self
            .store
            .append_turn(NewTurn {
                chat_id: chat,
                user_id: user,
                dialog: session.dialog,
                model_id: session.model_id.clone(),
                question: text.to_string(),
                answer: None,
            })
            .await?;
        self.sessions.update(chat, |session| {
            session.last_question = Some(text.to_string());
            session.current_record = Some(record);
            session.answer_message = None;
        });

        self.start_stream(chat, &session, window, PersistenceRef::overwrite(record))
            .await
            .map(RelayOutcome::Started)
    }

    /// Cancel the stream running for `chat`. True if one was cancelled.
    pub fn cancel_stream(&self, chat: ChatId) -> bool {
        let cancelled = self.active.cancel(chat);
        if cancelled {
            info!(%chat, "Stream cancelled by user");
        }
        cancelled
    }

    /// Ask the last question of the chat again.
    ///
    /// The previous answer message is deleted, or replaced by a notice when
    /// deletion fails. The new answer supersedes the old record once it
    /// completes.
    pub async fn regenerate(&self, chat: ChatId) -> Result<RelayOutcome> {
        let Some(session) = self.session_or_notice(chat).await? else {
            return Ok(RelayOutcome::ModelNotSelected);
        };
        let (Some(question), Some(record)) = (session.last_question.clone(), session.current_record)
        else {
            return Ok(RelayOutcome::NothingToRegenerate);
        };

        self.cancel_stream(chat);
        if let Some(message) = session.answer_message {
            if let Err(e) = self.transport.delete_message(chat, message).await {
                debug!(%chat, %message, error = %e, "Could not delete previous answer");
                if let Err(e) = self
                    .transport
                    .edit_message(chat, message, &self.config.notices.regenerating, Controls::None)
                    .await
                {
                    warn!(%chat, %message, error = %e, "Could not replace previous answer");
                }
            }
        }

        let history = self
            .store
            .fetch_history(session.user_id, session.dialog, Some(record))
            .await?;
        let window = self.build_window(&session, &history, &question).await;
        let successor = NewTurn {
            chat_id: chat,
            user_id: session.user_id,
            dialog: session.dialog,
            model_id: session.model_id.clone(),
            question,
            answer: None,
        };

        self.start_stream(chat, &session, window, PersistenceRef::regenerated(record, successor))
            .await
            .map(RelayOutcome::Started)
    }

    /// Cancel every stream, wait for the workers, then stop the publisher
    /// after it has applied what is still queued.
    pub async fn shutdown(&self) -> Result<()> {
        let cancelled = self.active.cancel_all();
        let streams: Vec<_> = lock(&self.streams).drain(..).collect();
        info!(cancelled, workers = streams.len(), "Shutting down relay");
        for stream in streams {
            if let Err(e) = stream.await {
                warn!(error = %e, "Stream task ended abnormally");
            }
        }

        self.shutdown.cancel();
        let publisher = lock(&self.publisher).take();
        if let Some(publisher) = publisher {
            publisher
                .await
                .map_err(|e| RelayError::with_source("Update publisher task failed", e))?;
        }
        Ok(())
    }

    async fn session_or_notice(&self, chat: ChatId) -> Result<Option<ChatSession>> {
        if let Some(session) = self.sessions.get(chat) {
            return Ok(Some(session));
        }
        self.transport
            .send_message(chat, &self.config.notices.select_model, Controls::None)
            .await?;
        Ok(None)
    }

    async fn build_window(
        &self,
        session: &ChatSession,
        history: &[ConversationTurn],
        text: &str,
    ) -> ContextWindow {
        let limit = match self.store.context_limit(session.model_id.clone()).await {
            Ok(limit) => limit,
            Err(e) => {
                warn!(model = %session.model_id, error = %e, "Context limit lookup failed");
                None
            }
        };
        let window = self.windows.build(history, text, limit);
        debug!(
            model = %session.model_id,
            tokens = window.estimated_tokens,
            usage = window.usage_percent,
            dropped = window.dropped_turns,
            "Context window built"
        );
        window
    }

    async fn start_stream(
        &self,
        chat: ChatId,
        session: &ChatSession,
        window: ContextWindow,
        persistence: PersistenceRef,
    ) -> Result<RelayTicket> {
        let message = self
            .transport
            .send_message(chat, &self.config.notices.generating, Controls::Cancel)
            .await?;
        let destination = Destination::of(chat, message);

        let token = CancellationToken::new();
        let finalized = self.active.watch_finalized(destination);
        let replaced = self.active.register(ActiveStream {
            destination,
            token: token.clone(),
        });
        if let Some(previous) = replaced {
            if previous.token.cancel() {
                info!(%chat, previous = %previous.destination, "Replacing running stream");
            }
        }

        let request = StreamRequest::new(session.model_id.clone(), window.messages, destination, token)
            .with_persistence(persistence);
        let handle = self.worker.spawn(request);
        let (tx, rx) = oneshot::channel();
        let relay = tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => {
                    let _ = tx.send(outcome);
                }
                Err(e) => warn!(error = %e, "Stream worker panicked"),
            }
        });
        {
            let mut streams = lock(&self.streams);
            streams.retain(|stream| !stream.is_finished());
            streams.push(relay);
        }

        Ok(RelayTicket {
            destination,
            usage_percent: window.usage_percent,
            suggest_new_dialog: window.suggest_new_dialog,
            dropped_turns: window.dropped_turns,
            outcome: rx,
            finalized,
            updates: self.updates.clone(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for RelayOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayOrchestrator")
            .field("sessions", &self.sessions.len())
            .field("active_streams", &self.active.len())
            .field("pending_updates", &self.updates.pending())
            .finish()
    }
}
