//! Markdown to Telegram markup conversion.
//!
//! Models answer in CommonMark-flavoured Markdown, while the Telegram
//! `Markdown` parse mode only knows `*bold*`, `_italic_` and code. Code spans
//! and fenced blocks are passed through untouched apart from dropping the
//! fence's language tag.

use once_cell::sync::Lazy;
use regex::Regex;

// Stands in for `*` until italics are rewritten.
const BOLD: char = '\u{1}';

static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```|`[^`\n]+`").unwrap());
static FENCE_LANG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[\w+#.-]+\n").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6} +(.+?) *$").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[-*] +(.+)$").unwrap());
static STRONG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*\n]+?)\*\*").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());

/// Convert Markdown to Telegram markup.
///
/// # Examples
/// ```
/// use relay_core::markup::to_telegram_markdown;
///
/// assert_eq!(to_telegram_markdown("## Title"), "*Title*");
/// assert_eq!(to_telegram_markdown("**bold** and *soft*"), "*bold* and _soft_");
/// ```
pub fn to_telegram_markdown(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for code in CODE.find_iter(text) {
        out.push_str(&convert_prose(&text[last..code.start()]));
        out.push_str(&FENCE_LANG.replace(code.as_str(), "```\n"));
        last = code.end();
    }
    out.push_str(&convert_prose(&text[last..]));
    out
}

fn convert_prose(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let bold = format!("{BOLD}${{1}}{BOLD}");
    let text = HEADING.replace_all(text, bold.as_str());
    let text = BULLET.replace_all(&text, "• ${1}");
    let text = STRONG.replace_all(&text, bold.as_str());
    let text = EMPHASIS.replace_all(&text, "_${1}_");
    text.replace(BOLD, "*")
}
