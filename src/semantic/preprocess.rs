//! Text preparation before embedding.
//!
//! Event captions come from social posts, so before embedding:
//! 1. Hashtags lose their `#` but keep the word
//! 2. Emoji are dropped
//! 3. Whitespace runs collapse to a single space
//! 4. Content is truncated to `MAX_CONTENT_LENGTH` characters

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 8000;

static HASHTAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#(\w+)").expect("valid hashtag regex"));

static EMOJI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{2600}-\x{26FF}\x{2700}-\x{27BF}\x{FE0F}\x{200D}]",
    )
    .expect("valid emoji regex")
});

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Clean event text for embedding.
///
/// Returns `None` if nothing is left after cleaning.
pub fn prepare_event_text(raw: &str) -> Option<String> {
    let text = HASHTAG_REGEX.replace_all(raw, "$1");
    let text = EMOJI_REGEX.replace_all(&text, "");
    let text = WHITESPACE_REGEX.replace_all(&text, " ");
    let text = text.trim();

    if text.is_empty() {
        return None;
    }

    Some(text.chars().take(MAX_CONTENT_LENGTH).collect())
}
