//! Shared per-chat state.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::cancellation::CancellationToken;
use crate::types::{ChatId, Destination, DialogId, MessageId, RecordId, UserId};

/// Per-chat conversation state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub user_id: UserId,
    pub model_id: String,
    pub dialog: DialogId,
    /// Question of the most recent request, re-asked on regenerate
    pub last_question: Option<String>,
    /// Record holding the answer currently shown to the user
    pub current_record: Option<RecordId>,
    /// Message carrying the regenerate control for `current_record`
    pub answer_message: Option<MessageId>,
}

impl ChatSession {
    pub fn new(user_id: UserId, model_id: impl Into<String>, dialog: DialogId) -> Self {
        Self {
            user_id,
            model_id: model_id.into(),
            dialog,
            last_question: None,
            current_record: None,
            answer_message: None,
        }
    }
}

/// Chat → session map, shared between the orchestrator and the publisher.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ChatId, ChatSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat: ChatId) -> Option<ChatSession> {
        self.sessions.get(&chat).map(|entry| entry.clone())
    }

    pub fn insert(&self, chat: ChatId, session: ChatSession) -> Option<ChatSession> {
        self.sessions.insert(chat, session)
    }

    /// Apply `f` to the session of `chat`; false when there is none.
    pub fn update<F>(&self, chat: ChatId, f: F) -> bool
    where
        F: FnOnce(&mut ChatSession),
    {
        match self.sessions.get_mut(&chat) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Point the session at a freshly published answer, provided it still
    /// refers to `expected`.
    pub fn rebind_answer(
        &self,
        chat: ChatId,
        expected: RecordId,
        record: RecordId,
        message: MessageId,
    ) -> bool {
        match self.sessions.get_mut(&chat) {
            Some(mut entry) if entry.current_record == Some(expected) => {
                entry.current_record = Some(record);
                entry.answer_message = Some(message);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// The stream currently feeding a chat.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub destination: Destination,
    pub token: CancellationToken,
}

/// Chat → active stream map.
///
/// An entry lives from stream start until the publisher finalizes its
/// destination, or until a newer stream for the same chat replaces it.
/// Callers may also watch a destination to learn when its terminal update
/// has been published.
#[derive(Debug, Clone, Default)]
pub struct ActiveStreams {
    streams: Arc<DashMap<ChatId, ActiveStream>>,
    finalized: Arc<DashMap<Destination, oneshot::Sender<()>>>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream, returning the one it replaces.
    pub fn register(&self, stream: ActiveStream) -> Option<ActiveStream> {
        self.streams.insert(stream.destination.chat_id, stream)
    }

    pub fn get(&self, chat: ChatId) -> Option<ActiveStream> {
        self.streams.get(&chat).map(|entry| entry.clone())
    }

    pub fn is_active(&self, chat: ChatId) -> bool {
        self.streams.contains_key(&chat)
    }

    /// Cancel the stream of `chat`. True only if this call cancelled it.
    pub fn cancel(&self, chat: ChatId) -> bool {
        self.get(chat).map_or(false, |stream| stream.token.cancel())
    }

    /// Drop the entry for `destination`'s chat if it still points there.
    pub fn release_if(&self, destination: Destination) -> bool {
        self.streams
            .remove_if(&destination.chat_id, |_, stream| stream.destination == destination)
            .is_some()
    }

    /// Resolves once the publisher has finalized `destination`.
    pub fn watch_finalized(&self, destination: Destination) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.finalized.insert(destination, tx);
        rx
    }

    /// Wake the watcher of `destination`, if any.
    pub fn notify_finalized(&self, destination: Destination) -> bool {
        self.finalized
            .remove(&destination)
            .map_or(false, |(_, tx)| tx.send(()).is_ok())
    }

    pub fn cancel_all(&self) -> usize {
        self.streams
            .iter()
            .filter(|entry| entry.token.cancel())
            .count()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
