//! Editor state: the document, its selection, undo history and the phase machine.
//!
//! All document mutations go through [`EditorState`]. Each entry point checks
//! the [`EditorPhase`] first, applies the delta, feeds the history manager,
//! transforms the selection and finally emits a [`TextChange`] on the event
//! sink. Rejected operations (out-of-range, busy) change nothing and emit
//! nothing.
//!
//! Phase machine:
//! - `Idle`: every source may mutate.
//! - `Reformatting`: entered by [`EditorState::reformat`] around bulk
//!   programmatic rewrites (citation style changes). User-sourced mutations,
//!   including undo/redo, are rejected with [`EditError::Busy`]. Programmatic
//!   mutations proceed and their change events carry `suppressed = true` so
//!   the suggestion trigger and autosave skip them. The rewrite is bracketed
//!   by history cutoffs and therefore forms one undo step.
//!
//! Source semantics for history: `User` and `Api` changes are recorded (they
//! never merge with each other), `Silent` changes only rebase the stacks.

use core_document::{
    AttrValue, Attributes, Delta, Document, DocumentChange, DocumentError, Embed, Range,
};
use core_events::{ChangeSource, EditorEvent, EventSink, TextChange};
use thiserror::Error;
use tracing::{debug, trace};

pub mod undo;
pub use undo::{HistoryEntry, HistoryManager, HistoryStep, MERGE_DELAY, UNDO_HISTORY_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorPhase {
    Idle,
    Reformatting,
}

impl EditorPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EditorPhase::Idle => "idle",
            EditorPhase::Reformatting => "reformatting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("a bulk reformat is in progress; user edits are rejected")]
    Busy,
    #[error(transparent)]
    Document(#[from] DocumentError),
}

pub struct EditorState {
    document: Document,
    selection: Option<Range>,
    history: HistoryManager,
    phase: EditorPhase,
    events: EventSink,
    busy_rejections: u64,
}

impl EditorState {
    pub fn new(document: Document, events: EventSink) -> Self {
        Self::with_history(document, HistoryManager::default(), events)
    }

    pub fn with_history(document: Document, history: HistoryManager, events: EventSink) -> Self {
        Self {
            document,
            selection: None,
            history,
            phase: EditorPhase::Idle,
            events,
            busy_rejections: 0,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
    pub fn selection(&self) -> Option<Range> {
        self.selection
    }
    pub fn phase(&self) -> EditorPhase {
        self.phase
    }
    pub fn is_reformatting(&self) -> bool {
        self.phase == EditorPhase::Reformatting
    }
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }
    pub fn events(&self) -> &EventSink {
        &self.events
    }
    /// User edits rejected while reformatting.
    pub fn busy_rejections(&self) -> u64 {
        self.busy_rejections
    }

    /// Replace the whole document (e.g. on open). History is cleared and the
    /// selection dropped; no change event is emitted.
    pub fn load(&mut self, document: Document) {
        debug!(target: "state.phase", len = document.len(), "document_loaded");
        self.document = document;
        self.selection = None;
        self.history.clear();
    }

    fn check_phase(&mut self, source: ChangeSource) -> Result<(), EditError> {
        if source == ChangeSource::User && self.phase == EditorPhase::Reformatting {
            self.busy_rejections += 1;
            debug!(target: "state.phase", phase = self.phase.as_str(), "user_edit_rejected_busy");
            return Err(EditError::Busy);
        }
        Ok(())
    }

    /// Apply an arbitrary delta. The delta is validated against the current
    /// length and either applied whole or not at all.
    pub fn apply(&mut self, delta: &Delta, source: ChangeSource) -> Result<DocumentChange, EditError> {
        self.check_phase(source)?;
        let selection_before = self.selection;
        let change = self.document.apply_delta(delta)?;
        self.history.record(&change, source, selection_before);
        // Programmatic inserts at the caret leave it in place.
        let priority = source != ChangeSource::User;
        self.selection = self
            .selection
            .map(|r| transform_range(r, &change.delta, priority));
        self.emit_change(&change, source);
        if self.selection != selection_before {
            self.events.emit(EditorEvent::SelectionChanged {
                range: self.selection,
                source,
            });
        }
        Ok(change)
    }

    pub fn insert_text(
        &mut self,
        index: usize,
        text: &str,
        attrs: &Attributes,
        source: ChangeSource,
    ) -> Result<DocumentChange, EditError> {
        self.check_phase(source)?;
        let delta = self.document.insert_text_delta(index, text, attrs)?;
        self.apply(&delta, source)
    }

    pub fn insert_embed(
        &mut self,
        index: usize,
        embed: Embed,
        attrs: &Attributes,
        source: ChangeSource,
    ) -> Result<DocumentChange, EditError> {
        self.check_phase(source)?;
        let delta = self.document.insert_embed_delta(index, embed, attrs)?;
        self.apply(&delta, source)
    }

    pub fn delete_text(
        &mut self,
        index: usize,
        length: usize,
        source: ChangeSource,
    ) -> Result<DocumentChange, EditError> {
        self.check_phase(source)?;
        let delta = self.document.delete_text_delta(index, length)?;
        self.apply(&delta, source)
    }

    pub fn format_text(
        &mut self,
        index: usize,
        length: usize,
        attrs: &Attributes,
        source: ChangeSource,
    ) -> Result<DocumentChange, EditError> {
        self.check_phase(source)?;
        let delta = self.document.format_text_delta(index, length, attrs)?;
        self.apply(&delta, source)
    }

    pub fn format_line(
        &mut self,
        index: usize,
        length: usize,
        name: &str,
        value: AttrValue,
        source: ChangeSource,
    ) -> Result<DocumentChange, EditError> {
        self.check_phase(source)?;
        let delta = self.document.format_line_delta(index, length, name, value)?;
        self.apply(&delta, source)
    }

    pub fn set_selection(&mut self, range: Option<Range>, source: ChangeSource) -> Result<(), EditError> {
        if let Some(r) = range {
            r.check(self.document.len())?;
        }
        if self.selection != range {
            self.selection = range;
            trace!(target: "state.phase", index = range.map(|r| r.index), length = range.map(|r| r.length), "selection_set");
            self.events
                .emit(EditorEvent::SelectionChanged { range, source });
        }
        Ok(())
    }

    pub fn cutoff(&mut self) {
        self.history.cutoff();
    }

    /// Undo the last entry. Returns `false` when the undo stack is empty.
    pub fn undo(&mut self) -> Result<bool, EditError> {
        self.check_phase(ChangeSource::User)?;
        let Some(step) = self.history.undo(&mut self.document)? else {
            return Ok(false);
        };
        self.finish_step(step);
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, EditError> {
        self.check_phase(ChangeSource::User)?;
        let Some(step) = self.history.redo(&mut self.document)? else {
            return Ok(false);
        };
        self.finish_step(step);
        Ok(true)
    }

    fn finish_step(&mut self, step: HistoryStep) {
        self.emit_change(&step.change, ChangeSource::User);
        let len = self.document.len();
        let selection = step.selection.map(|r| clamp_range(r, len));
        if selection.is_some() && selection != self.selection {
            self.selection = selection;
            self.events.emit(EditorEvent::SelectionChanged {
                range: selection,
                source: ChangeSource::User,
            });
        }
    }

    /// Run a bulk programmatic rewrite in the `Reformatting` phase, bracketed
    /// by history cutoffs. Nested calls run inside the outer phase.
    pub fn reformat<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.phase == EditorPhase::Reformatting {
            return f(self);
        }
        self.history.cutoff();
        self.phase = EditorPhase::Reformatting;
        debug!(target: "state.phase", from = "idle", to = "reformatting", "phase_transition");
        let out = f(self);
        self.phase = EditorPhase::Idle;
        debug!(target: "state.phase", from = "reformatting", to = "idle", "phase_transition");
        self.history.cutoff();
        out
    }

    fn emit_change(&self, change: &DocumentChange, source: ChangeSource) {
        self.events.emit(EditorEvent::TextChanged(TextChange {
            delta: change.delta.clone(),
            old_len: change.old_len,
            new_len: change.new_len,
            source,
            suppressed: self.phase == EditorPhase::Reformatting,
        }));
    }
}

/// Map a range through `delta`.
pub fn transform_range(range: Range, delta: &Delta, priority: bool) -> Range {
    let start = delta.transform_position(range.index, priority);
    let end = delta.transform_position(range.end(), priority);
    Range::new(start, end.saturating_sub(start))
}

fn clamp_range(range: Range, len: usize) -> Range {
    let last = len.saturating_sub(1);
    let index = range.index.min(last);
    let end = range.end().min(last).max(index);
    Range::new(index, end - index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_document::attr;
    use core_events::EventReceiver;
    use pretty_assertions::assert_eq;

    fn state(text: &str) -> (EditorState, EventReceiver) {
        let (sink, rx) = core_events::channel();
        (EditorState::new(Document::from_text(text), sink), rx)
    }

    fn text_changes(rx: &mut EventReceiver) -> Vec<TextChange> {
        rx.drain()
            .into_iter()
            .filter_map(|ev| match ev {
                EditorEvent::TextChanged(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn mutation_emits_change_event() {
        let (mut st, mut rx) = state("abc\n");
        st.insert_text(3, "d", &Attributes::new(), ChangeSource::User)
            .unwrap();
        let changes = text_changes(&mut rx);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_len, 4);
        assert_eq!(changes[0].new_len, 5);
        assert_eq!(changes[0].source, ChangeSource::User);
        assert!(!changes[0].suppressed);
    }

    #[test]
    fn out_of_range_is_rejected_without_events() {
        let (mut st, mut rx) = state("abc\n");
        let err = st.delete_text(2, 10, ChangeSource::User).unwrap_err();
        assert!(matches!(err, EditError::Document(DocumentError::OutOfRange { .. })));
        assert_eq!(st.document().text(), "abc\n");
        assert!(rx.drain().is_empty());
        assert!(!st.history().can_undo());
    }

    #[test]
    fn user_edits_rejected_while_reformatting() {
        let (mut st, mut rx) = state("abc\n");
        let (user, api) = st.reformat(|st| {
            assert_eq!(st.phase(), EditorPhase::Reformatting);
            let user = st.insert_text(0, "x", &Attributes::new(), ChangeSource::User);
            let api = st.insert_text(0, "y", &Attributes::new(), ChangeSource::Api);
            (user, api)
        });
        assert_eq!(user.unwrap_err(), EditError::Busy);
        assert!(api.is_ok());
        assert_eq!(st.phase(), EditorPhase::Idle);
        assert_eq!(st.document().text(), "yabc\n");
        assert_eq!(st.busy_rejections(), 1);
        let changes = text_changes(&mut rx);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].suppressed);
    }

    #[test]
    fn reformat_is_one_undo_step_separate_from_typing() {
        let (mut st, _rx) = state("ab\n");
        st.insert_text(2, "c", &Attributes::new(), ChangeSource::User)
            .unwrap();
        st.reformat(|st| {
            st.insert_text(0, "1", &Attributes::new(), ChangeSource::Api)
                .unwrap();
            st.insert_text(0, "2", &Attributes::new(), ChangeSource::Api)
                .unwrap();
        });
        assert_eq!(st.history().undo_depth(), 2);
        assert!(st.undo().unwrap());
        assert_eq!(st.document().text(), "abc\n");
        assert!(st.undo().unwrap());
        assert_eq!(st.document().text(), "ab\n");
        assert!(!st.undo().unwrap());
    }

    #[test]
    fn undo_during_reformat_is_busy() {
        let (mut st, _rx) = state("ab\n");
        st.insert_text(0, "x", &Attributes::new(), ChangeSource::User)
            .unwrap();
        let res = st.reformat(|st| st.undo());
        assert_eq!(res, Err(EditError::Busy));
        assert_eq!(st.document().text(), "xab\n");
    }

    #[test]
    fn selection_follows_changes() {
        let (mut st, _rx) = state("hello world\n");
        st.set_selection(Some(Range::new(6, 5)), ChangeSource::User)
            .unwrap();
        st.insert_text(0, ">> ", &Attributes::new(), ChangeSource::Api)
            .unwrap();
        assert_eq!(st.selection(), Some(Range::new(9, 5)));
        st.delete_text(0, 3, ChangeSource::User).unwrap();
        assert_eq!(st.selection(), Some(Range::new(6, 5)));
    }

    #[test]
    fn api_insert_at_caret_keeps_caret() {
        let (mut st, _rx) = state("ab\n");
        st.set_selection(Some(Range::caret(2)), ChangeSource::User)
            .unwrap();
        st.insert_text(2, "zz", &Attributes::new(), ChangeSource::Api)
            .unwrap();
        assert_eq!(st.selection(), Some(Range::caret(2)));
        st.insert_text(2, "u", &Attributes::new(), ChangeSource::User)
            .unwrap();
        assert_eq!(st.selection(), Some(Range::caret(3)));
    }

    #[test]
    fn set_selection_validates_bounds() {
        let (mut st, _rx) = state("ab\n");
        assert!(st.set_selection(Some(Range::new(2, 5)), ChangeSource::User).is_err());
        assert_eq!(st.selection(), None);
    }

    #[test]
    fn silent_changes_are_not_undoable() {
        let (mut st, _rx) = state("ab\n");
        st.format_line(0, 0, attr::BLOCK_ID, AttrValue::from("b1"), ChangeSource::Silent)
            .unwrap();
        assert!(!st.history().can_undo());
        assert_eq!(
            st.document().lines()[0].attributes.get_str(attr::BLOCK_ID),
            Some("b1")
        );
    }

    #[test]
    fn undo_restores_selection_and_emits_user_change() {
        let (mut st, mut rx) = state("ab\n");
        st.set_selection(Some(Range::caret(2)), ChangeSource::User)
            .unwrap();
        st.insert_text(2, "cd", &Attributes::new(), ChangeSource::User)
            .unwrap();
        st.set_selection(Some(Range::caret(4)), ChangeSource::User)
            .unwrap();
        rx.drain();
        st.undo().unwrap();
        assert_eq!(st.selection(), Some(Range::caret(2)));
        let changes = text_changes(&mut rx);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].source, ChangeSource::User);
        st.redo().unwrap();
        assert_eq!(st.document().text(), "abcd\n");
        assert_eq!(st.selection(), Some(Range::caret(4)));
    }
}
