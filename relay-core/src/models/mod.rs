//! Language model integration and message types.
//!
//! This module provides the conversation and wire types exchanged with a
//! completion endpoint, the provider trait, and the HTTP provider.

mod provider;
mod types;
#[cfg(feature = "http")]
mod openrouter;

pub use provider::{ByteStream, ChatProvider};
pub use types::{
    ChatCompletionRequest, ChunkChoice, ChunkDelta, ConversationTurn, Role, StreamChunk,
};
#[cfg(feature = "http")]
pub use openrouter::OpenRouterProvider;
