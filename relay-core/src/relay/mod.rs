//! Relay orchestration.
//!
//! [`RelayOrchestrator`] accepts user messages, builds the context window,
//! starts a stream worker per message and owns the registries that tie a chat
//! to its session and to the stream currently answering it.

mod orchestrator;
mod registry;

pub use orchestrator::{RelayBuilder, RelayOrchestrator, RelayOutcome, RelayTicket};
pub use registry::{ActiveStream, ActiveStreams, ChatSession, SessionRegistry};
