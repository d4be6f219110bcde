//! The chat transport seam.
//!
//! A transport delivers text to a chat destination and can later replace or
//! remove it. Implementations wrap a concrete messenger API; the crate itself
//! only depends on this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChatId, MessageId};

/// Inline control attached to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controls {
    None,
    /// Stops the stream feeding this message
    Cancel,
    /// Re-asks the question answered by this message
    Regenerate,
}

/// Result of a successful edit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Edited,
    /// The destination already shows exactly this text
    NotModified,
}

/// Errors reported by a chat transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("message not found")]
    MessageNotFound,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Other(String),
}

/// Destination-addressed message delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new message and return its id.
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        controls: Controls,
    ) -> Result<MessageId, TransportError>;

    /// Replace the text of an existing message.
    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        controls: Controls,
    ) -> Result<EditOutcome, TransportError>;

    /// Replace only the controls of an existing message, keeping its text.
    async fn edit_controls(
        &self,
        chat: ChatId,
        message: MessageId,
        controls: Controls,
    ) -> Result<EditOutcome, TransportError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TransportError>;
}
