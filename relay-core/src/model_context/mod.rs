//! Model context management for chat completion requests.
//!
//! This module estimates token usage and selects how much prior conversation
//! is resent under a model's context limit.

mod tokens;
mod window;

pub use tokens::{estimate_text_tokens, estimate_turn_tokens, MESSAGE_OVERHEAD_TOKENS};
pub use window::{ContextWindow, ContextWindowBuilder};
