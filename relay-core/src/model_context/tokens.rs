//! Approximate token counting.
//!
//! The estimate is a character-ratio heuristic, not a tokenizer: Cyrillic text
//! tokenizes denser than Latin text, so the ratio is picked from whichever
//! script dominates the input.

use crate::models::ConversationTurn;

/// Tokens charged per message for role metadata.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 5;

const LATIN_CHARS_PER_TOKEN: usize = 4;
const CYRILLIC_CHARS_PER_TOKEN: usize = 2;

/// Estimate the token count of a piece of text.
///
/// # Examples
/// ```
/// use relay_core::model_context::estimate_text_tokens;
///
/// assert_eq!(estimate_text_tokens(""), 0);
/// assert_eq!(estimate_text_tokens("hello world"), 3);
/// assert_eq!(estimate_text_tokens("привет"), 3);
/// ```
pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let mut latin = 0usize;
    let mut cyrillic = 0usize;
    let mut total = 0usize;
    for ch in text.chars() {
        total += 1;
        if is_latin_letter(ch) {
            latin += 1;
        } else if ('\u{0400}'..='\u{04FF}').contains(&ch) {
            cyrillic += 1;
        }
    }

    let per_token = if cyrillic > latin {
        CYRILLIC_CHARS_PER_TOKEN
    } else {
        LATIN_CHARS_PER_TOKEN
    };
    total.div_ceil(per_token)
}

/// ASCII letters plus the accented Latin blocks (Latin-1 Supplement,
/// Extended-A/B, Extended Additional).
fn is_latin_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic()
        || (ch.is_alphabetic()
            && matches!(ch, '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}'))
}

/// Estimate the token count of one message including its overhead.
pub fn estimate_turn_tokens(turn: &ConversationTurn) -> usize {
    estimate_text_tokens(&turn.content) + MESSAGE_OVERHEAD_TOKENS
}
