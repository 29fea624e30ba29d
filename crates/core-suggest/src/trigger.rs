//! When to ask for a continuation.
//!
//! A trigger fires when the caret sits after sentence-ending punctuation
//! (trailing spaces ignored) or on a line the user just created, provided no
//! user deletion happened within the debounce window. Suppressed and
//! non-user changes are ignored entirely.

use crate::context::ends_sentence;
use core_document::{Document, Line};
use core_events::{ChangeSource, TextChange};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    debounce: Duration,
    last_deletion: Option<Instant>,
    created_line: bool,
}

impl TriggerPolicy {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_deletion: None,
            created_line: false,
        }
    }

    /// Feed a committed change. Returns `true` when the change is a user edit
    /// worth evaluating a trigger for.
    pub fn observe(&mut self, change: &TextChange, now: Instant) -> bool {
        if change.suppressed || change.source != ChangeSource::User {
            return false;
        }
        if change.has_deletes() {
            self.last_deletion = Some(now);
            trace!(target: "suggest.trigger", "deletion_noted");
        }
        self.created_line = change.delta.text().contains('\n');
        true
    }

    pub fn in_debounce(&self, now: Instant) -> bool {
        self.last_deletion
            .is_some_and(|at| now.saturating_duration_since(at) < self.debounce)
    }

    /// Whether a request should fire for `caret`.
    pub fn should_fire(&self, doc: &Document, caret: usize, now: Instant) -> bool {
        if self.in_debounce(now) {
            trace!(target: "suggest.trigger", "suppressed_by_deletion_debounce");
            return false;
        }
        let Some(line) = doc.line_at(caret) else {
            return false;
        };
        if self.created_line && line.is_empty() && line.index > 0 {
            trace!(target: "suggest.trigger", caret, "empty_line");
            return true;
        }
        let fire = ends_sentence(&line_prefix(&line, caret));
        if fire {
            trace!(target: "suggest.trigger", caret, "sentence_end");
        }
        fire
    }
}

fn line_prefix(line: &Line, caret: usize) -> String {
    line.text()
        .chars()
        .take(caret.saturating_sub(line.index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_document::Delta;

    fn user_change(delta: Delta) -> TextChange {
        TextChange {
            delta,
            old_len: 0,
            new_len: 0,
            source: ChangeSource::User,
            suppressed: false,
        }
    }

    #[test]
    fn fires_after_punctuation() {
        let doc = Document::from_text("Hello. \n");
        let p = TriggerPolicy::new(Duration::from_millis(200));
        let now = Instant::now();
        assert!(p.should_fire(&doc, 7, now));
        assert!(p.should_fire(&doc, 6, now));
        assert!(!p.should_fire(&doc, 5, now));
    }

    #[test]
    fn deletion_debounces_trigger() {
        let doc = Document::from_text("Hello.\n");
        let mut p = TriggerPolicy::new(Duration::from_millis(200));
        let t0 = Instant::now();
        assert!(p.observe(&user_change(Delta::new().retain(6).delete(1)), t0));
        assert!(!p.should_fire(&doc, 6, t0 + Duration::from_millis(50)));
        assert!(p.should_fire(&doc, 6, t0 + Duration::from_millis(250)));
    }

    #[test]
    fn fires_on_new_empty_line() {
        let doc = Document::from_text("Para\n\n");
        let mut p = TriggerPolicy::new(Duration::from_millis(200));
        let now = Instant::now();
        assert!(!p.should_fire(&doc, 5, now));
        p.observe(&user_change(Delta::new().retain(4).insert("\n")), now);
        assert!(p.should_fire(&doc, 5, now));
    }

    #[test]
    fn suppressed_and_api_changes_ignored() {
        let mut p = TriggerPolicy::new(Duration::from_millis(200));
        let now = Instant::now();
        let mut change = user_change(Delta::new().delete(1));
        change.suppressed = true;
        assert!(!p.observe(&change, now));
        change.suppressed = false;
        change.source = ChangeSource::Api;
        assert!(!p.observe(&change, now));
        assert!(!p.in_debounce(now));
    }
}
