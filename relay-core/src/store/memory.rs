//! In-memory conversation store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ConversationStore, NewTurn};
use crate::error::StoreError;
use crate::models::ConversationTurn;
use crate::types::{ChatId, DialogId, RecordId, UserId};

/// One persisted question with its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogRecord {
    pub id: RecordId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub dialog: DialogId,
    pub model_id: String,
    pub question: String,
    pub answer: Option<String>,
    /// Cleared when a regenerated answer supersedes this one
    pub displayed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    records: Vec<DialogRecord>,
    dialog_counters: HashMap<UserId, u32>,
    context_limits: HashMap<String, u32>,
}

/// An in-memory implementation of [`ConversationStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the context length of a model.
    pub fn set_context_limit(&self, model: impl Into<String>, limit: u32) {
        self.lock().context_limits.insert(model.into(), limit);
    }

    pub fn record(&self, id: RecordId) -> Option<DialogRecord> {
        self.lock().records.iter().find(|record| record.id == id).cloned()
    }

    /// Snapshot of every record, inactive ones included.
    pub fn records(&self) -> Vec<DialogRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_record<F>(&self, id: RecordId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut DialogRecord),
    {
        let mut tables = self.lock();
        let record = tables
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or(StoreError::RecordNotFound { record_id: id.get() })?;
        f(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn next_dialog_sequence(&self, user: UserId) -> Result<DialogId, StoreError> {
        let mut tables = self.lock();
        let counter = tables.dialog_counters.entry(user).or_insert(0);
        *counter += 1;
        Ok(DialogId(*counter))
    }

    async fn append_turn(&self, turn: NewTurn) -> Result<RecordId, StoreError> {
        let mut tables = self.lock();
        let id = RecordId(tables.records.len() as i64 + 1);
        let now = Utc::now();
        tables.records.push(DialogRecord {
            id,
            chat_id: turn.chat_id,
            user_id: turn.user_id,
            dialog: turn.dialog,
            model_id: turn.model_id,
            question: turn.question,
            answer: turn.answer,
            displayed: true,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_answer(&self, record: RecordId, answer: String) -> Result<(), StoreError> {
        self.with_record(record, |row| row.answer = Some(answer))
    }

    async fn mark_inactive(&self, record: RecordId) -> Result<(), StoreError> {
        self.with_record(record, |row| row.displayed = false)
    }

    async fn fetch_history(
        &self,
        user: UserId,
        dialog: DialogId,
        before: Option<RecordId>,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let tables = self.lock();
        let mut turns = Vec::new();
        for record in tables.records.iter().filter(|record| {
            record.user_id == user
                && record.dialog == dialog
                && record.displayed
                && before.map_or(true, |limit| record.id < limit)
        }) {
            if let Some(answer) = &record.answer {
                turns.push(ConversationTurn::user(record.question.clone()));
                turns.push(ConversationTurn::assistant(answer.clone()));
            }
        }
        Ok(turns)
    }

    async fn context_limit(&self, model: String) -> Result<Option<u32>, StoreError> {
        Ok(self.lock().context_limits.get(&model).copied())
    }
}
