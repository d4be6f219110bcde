//! Conversation persistence.
//!
//! The relay reads dialog history and writes answers through
//! [`ConversationStore`]. Each call is a single-row operation; no transaction
//! spans several calls.

mod memory;

pub use memory::{DialogRecord, InMemoryConversationStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::ConversationTurn;
use crate::types::{ChatId, DialogId, RecordId, UserId};

/// A question (and possibly its answer) to be persisted as a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTurn {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub dialog: DialogId,
    pub model_id: String,
    pub question: String,
    /// `None` while the answer is still being generated
    pub answer: Option<String>,
}

/// Storage of dialog records and model metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Allocate the next dialog number for a user.
    async fn next_dialog_sequence(&self, user: UserId) -> Result<DialogId, StoreError>;

    async fn append_turn(&self, turn: NewTurn) -> Result<RecordId, StoreError>;

    /// Overwrite the answer of an existing record.
    async fn update_answer(&self, record: RecordId, answer: String) -> Result<(), StoreError>;

    /// Hide a superseded answer from history.
    async fn mark_inactive(&self, record: RecordId) -> Result<(), StoreError>;

    /// History of a dialog as alternating user/assistant turns, oldest first.
    ///
    /// Inactive records and records without an answer are skipped. With
    /// `before`, only records older than that record are returned.
    async fn fetch_history(
        &self,
        user: UserId,
        dialog: DialogId,
        before: Option<RecordId>,
    ) -> Result<Vec<ConversationTurn>, StoreError>;

    /// Context length of a model in tokens, when known.
    async fn context_limit(&self, model: String) -> Result<Option<u32>, StoreError>;
}
