//! Token-budgeted context window.

use serde::{Deserialize, Serialize};

use super::tokens::estimate_turn_tokens;
use crate::config::ContextConfig;
use crate::models::ConversationTurn;

/// The messages selected for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    /// Oldest first; the last entry is always the current user message
    pub messages: Vec<ConversationTurn>,
    pub estimated_tokens: usize,
    /// Estimated share of the context limit, in percent
    pub usage_percent: f64,
    /// Number of history turns left out
    pub dropped_turns: usize,
    /// Usage crossed the new-dialog threshold
    pub suggest_new_dialog: bool,
}

/// Selects as much recent history as fits the model's context budget.
///
/// History is trimmed from the oldest end while the estimate exceeds
/// `fill_ratio × limit`. The current message is never dropped, so a single
/// over-long message still yields a window of one turn.
///
/// # Example
///
/// ```rust
/// use relay_core::config::ContextConfig;
/// use relay_core::model_context::ContextWindowBuilder;
///
/// let builder = ContextWindowBuilder::new(ContextConfig::default());
/// let window = builder.build(&[], "hi", Some(100));
/// assert_eq!(window.messages.len(), 1);
/// assert_eq!(window.usage_percent, 6.0);
/// ```
#[derive(Debug, Clone)]
pub struct ContextWindowBuilder {
    config: ContextConfig,
}

impl ContextWindowBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the window for `current` on top of `history`.
    ///
    /// An unknown or zero `context_limit` falls back to the configured default.
    pub fn build(
        &self,
        history: &[ConversationTurn],
        current: &str,
        context_limit: Option<u32>,
    ) -> ContextWindow {
        let limit = match context_limit {
            Some(limit) if limit > 0 => limit,
            _ => self.config.default_context_limit,
        };
        let budget = self.config.fill_ratio * f64::from(limit);

        let mut messages: Vec<ConversationTurn> = history.to_vec();
        messages.push(ConversationTurn::user(current));

        let mut estimates: Vec<usize> = messages.iter().map(estimate_turn_tokens).collect();
        let mut total: usize = estimates.iter().sum();

        let mut dropped = 0;
        while total as f64 > budget && messages.len() - dropped > 1 {
            total -= estimates[dropped];
            dropped += 1;
        }
        messages.drain(..dropped);
        estimates.drain(..dropped);

        let usage_percent = 100.0 * total as f64 / f64::from(limit);
        ContextWindow {
            messages,
            estimated_tokens: total,
            usage_percent,
            dropped_turns: dropped,
            suggest_new_dialog: usage_percent > self.config.new_dialog_threshold_percent,
        }
    }
}

impl Default for ContextWindowBuilder {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}
