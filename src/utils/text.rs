//! Text helpers shared by the pipeline edges.
//!
//! Covers the small amount of text massaging the conversation needs:
//! normalizing client language tags, stripping markdown before speech
//! synthesis, and spotting a self-introduced user name.

use once_cell::sync::Lazy;
use regex::Regex;

/// Markdown emphasis and inline-code markers that read badly when spoken.
static SPEECH_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_`]").expect("valid regex"));

/// Markdown links `[label](target)`; only the label should be spoken.
static SPEECH_LINKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));

/// Self-introduction phrasings that carry a user name.
static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)my name is\s+([a-zA-Z]+)",
        r"(?i)i am\s+([a-zA-Z]+)",
        r"(?i)i'm\s+([a-zA-Z]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Map a client language tag to the tag the speech services understand.
///
/// Unknown tags fall back to English rather than failing the request.
pub fn speech_language(tag: &str) -> &'static str {
    match tag.trim().to_lowercase().as_str() {
        "en" | "english" | "en-us" | "en-gb" => "en",
        "hi" | "hindi" => "hi",
        _ => "en",
    }
}

/// Human-readable language name for prompt and synthesis instructions.
pub fn language_name(tag: &str) -> &'static str {
    match speech_language(tag) {
        "hi" => "Hindi",
        _ => "English",
    }
}

/// Strip markup that a text model tends to emit but a voice should not read.
pub fn clean_for_speech(text: &str) -> String {
    let without_links = SPEECH_LINKS.replace_all(text, "$1");
    SPEECH_MARKUP.replace_all(&without_links, "").trim().to_string()
}

/// Extract a user name from an introductory message, if present.
pub fn detect_user_name(text: &str) -> Option<String> {
    for pattern in NAME_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(text) {
            let raw = captures.get(1)?.as_str();
            let mut chars = raw.chars();
            let first = chars.next()?;
            return Some(first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase());
        }
    }
    None
}
