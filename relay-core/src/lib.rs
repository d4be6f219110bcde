//! # Relay Core
//!
//! Relay core streams answers from an OpenAI-compatible chat-completion
//! endpoint (OpenRouter by default) into a chat interface while they are
//! being generated.
//!
//! ## Features
//!
//! - **Streaming relay**: server-sent events are decoded into a growing answer
//!   that is republished at a bounded rate to one message per request
//! - **Cancellation and timeouts**: every stream carries a token and a time
//!   ceiling and always ends in exactly one terminal state
//! - **Deduplicated publishing**: a single publisher task edits messages,
//!   skips redundant edits and splits over-long answers
//! - **Context budgeting**: prior dialog turns are resent only as far as the
//!   model's context limit allows
//!
//! ## Quick Start
//!
//! ```rust
//! use relay_core::model_context::ContextWindowBuilder;
//! use relay_core::models::ConversationTurn;
//! use relay_core::CancellationToken;
//!
//! let history = vec![
//!     ConversationTurn::user("What is Rust?"),
//!     ConversationTurn::assistant("A systems programming language."),
//! ];
//! let window = ContextWindowBuilder::default().build(&history, "Who made it?", Some(4096));
//! assert_eq!(window.messages.len(), 3);
//! assert!(!window.suggest_new_dialog);
//!
//! let token = CancellationToken::new();
//! assert!(token.cancel());
//! assert!(token.is_cancelled());
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

// Error types (must be first for other modules to use)
pub mod error;

pub mod cancellation;
pub mod clock;
pub mod config;
pub mod logging;
pub mod markup;
pub mod types;

pub mod model_context;
pub mod models;
pub mod publisher;
pub mod relay;
pub mod store;
pub mod streaming;
pub mod transport;

pub use cancellation::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RelayConfig;
pub use error::{ConfigError, ProviderError, RelayError, Result, StoreError};
pub use model_context::{ContextWindow, ContextWindowBuilder};
pub use models::{ChatProvider, ConversationTurn, Role};
#[cfg(feature = "http")]
pub use models::OpenRouterProvider;
pub use publisher::{PartialUpdate, UpdateKind};
pub use relay::{RelayBuilder, RelayOrchestrator, RelayOutcome, RelayTicket};
pub use store::{ConversationStore, InMemoryConversationStore};
pub use streaming::{GuardState, StreamOutcome};
pub use transport::{ChatTransport, Controls, EditOutcome, TransportError};
pub use types::{ChatId, Destination, DialogId, MessageId, RecordId, UserId};

/// Current version of relay-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Root tracing target for the relay-core library
pub const ROOT_TARGET: &str = "relay_core";

/// Tracing target for structured stream lifecycle events
pub use logging::EVENT_TARGET;
