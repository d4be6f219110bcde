//! Updates passed from stream workers to the publisher.

use serde::{Deserialize, Serialize};

use crate::store::NewTurn;
use crate::types::{Destination, RecordId};

/// Stage of a stream an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    Partial,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

/// How a completed answer is written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceMode {
    /// Fill in the answer of the pending record
    Overwrite,
    /// Store the answer as a new record and retire the previous one
    Regenerated(NewTurn),
}

/// Pointer to the record a completed answer belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceRef {
    pub record: RecordId,
    pub mode: PersistenceMode,
}

impl PersistenceRef {
    pub fn overwrite(record: RecordId) -> Self {
        Self {
            record,
            mode: PersistenceMode::Overwrite,
        }
    }

    /// `record` is the answer being replaced; `turn` describes its successor.
    pub fn regenerated(record: RecordId, turn: NewTurn) -> Self {
        Self {
            record,
            mode: PersistenceMode::Regenerated(turn),
        }
    }
}

/// A snapshot of streamed text addressed to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialUpdate {
    pub destination: Destination,
    pub text: String,
    pub kind: UpdateKind,
    pub persistence: Option<PersistenceRef>,
}

impl PartialUpdate {
    pub fn partial(destination: Destination, text: impl Into<String>) -> Self {
        Self::new(destination, text, UpdateKind::Partial)
    }

    pub fn terminal(destination: Destination, text: impl Into<String>, kind: UpdateKind) -> Self {
        Self::new(destination, text, kind)
    }

    fn new(destination: Destination, text: impl Into<String>, kind: UpdateKind) -> Self {
        Self {
            destination,
            text: text.into(),
            kind,
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Option<PersistenceRef>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn is_final(&self) -> bool {
        self.kind != UpdateKind::Partial
    }

    pub fn is_error(&self) -> bool {
        self.kind == UpdateKind::Failed
    }

    pub fn was_canceled(&self) -> bool {
        self.kind == UpdateKind::Canceled
    }

    pub fn timed_out(&self) -> bool {
        self.kind == UpdateKind::TimedOut
    }
}
