//! Identifier types shared across the relay.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// A chat on the transport side.
    ChatId(i64)
);
id_type!(
    /// A message inside a chat.
    MessageId(i64)
);
id_type!(
    /// The user who sent a message.
    UserId(i64)
);
id_type!(
    /// A persisted dialog record (one question and its answer).
    RecordId(i64)
);
id_type!(
    /// Sequence number of a dialog session, monotonically increasing per user.
    DialogId(u32)
);

/// Where streamed output is rendered: one message in one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl Destination {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id: ChatId(chat_id),
            message_id: MessageId(message_id),
        }
    }

    pub fn of(chat_id: ChatId, message_id: MessageId) -> Self {
        Self { chat_id, message_id }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.message_id)
    }
}
