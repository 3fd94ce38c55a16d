//! Conversation titles derived from the first user message.

use crate::types::DEFAULT_TITLE;

/// Conversational openers dropped from the front of a title. Matched case-sensitively.
const FILLER_PREFIXES: &[&str] = &[
    "Can you",
    "Could you",
    "Please",
    "Help me",
    "I need",
    "How to",
    "What is",
    "How do I",
    "I want to",
    "Tell me about",
    "Explain",
    "Give me",
    "Show me",
];

const SHORT_TITLE_CHARS: usize = 40;
const SENTENCE_TITLE_CHARS: usize = 50;
const TITLE_WORDS: usize = 6;
const ELLIPSIS: &str = "...";

pub fn generate_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    let mut cleaned = strip_filler(trimmed).trim();
    if cleaned.is_empty() {
        cleaned = trimmed;
    }
    if cleaned.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    if char_len(cleaned) <= SHORT_TITLE_CHARS {
        return cleaned.to_string();
    }

    if let Some(end) = cleaned.find(['.', '!', '?']) {
        // terminators are ASCII, so end + 1 stays on a char boundary
        let sentence = cleaned[..=end].trim();
        if char_len(sentence) <= SENTENCE_TITLE_CHARS {
            return sentence.to_string();
        }
    }

    let mut title = cleaned
        .split_whitespace()
        .take(TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if char_len(&title) < SHORT_TITLE_CHARS {
        title.push_str(ELLIPSIS);
    }
    title
}

fn strip_filler(text: &str) -> &str {
    for prefix in FILLER_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix)
            && rest.chars().next().is_none_or(|c| !c.is_alphanumeric())
        {
            return rest;
        }
    }
    text
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
