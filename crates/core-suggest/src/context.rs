//! Request context assembled around the caret.

use core_document::{Document, attr};
use core_services::SuggestionContext;
use unicode_segmentation::UnicodeSegmentation;

const SENTENCE_END: [char; 3] = ['.', '!', '?'];

pub fn ends_sentence(text: &str) -> bool {
    text.trim_end_matches([' ', '\t'])
        .ends_with(SENTENCE_END)
}

/// Words as counted for billing.
pub fn word_count(text: &str) -> u64 {
    text.unicode_words().count() as u64
}

fn prefix(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Last sentence of `text`, trimmed.
pub fn last_sentence(text: &str) -> String {
    text.split_sentence_bounds()
        .filter(|s| !s.trim().is_empty())
        .last()
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub fn build_context(doc: &Document, caret: usize) -> SuggestionContext {
    let full_text = doc.text();
    let caret = caret.min(doc.len().saturating_sub(1));
    let lines = doc.lines();
    let current = lines
        .iter()
        .position(|l| caret <= l.newline_index())
        .unwrap_or(lines.len().saturating_sub(1));

    let heading = lines
        .iter()
        .take(current + 1)
        .rev()
        .find(|l| l.attributes.contains_key(attr::HEADER))
        .map(|l| l.text());

    let (paragraph, before_in_line) = match lines.get(current) {
        Some(line) => (line.text(), prefix(&line.text(), caret - line.index)),
        None => (String::new(), String::new()),
    };
    let sentence = last_sentence(&before_in_line);
    SuggestionContext {
        text_before_caret: prefix(&full_text, caret),
        full_text,
        heading,
        sentence_closed: ends_sentence(&sentence),
        sentence,
        paragraph,
    }
}
