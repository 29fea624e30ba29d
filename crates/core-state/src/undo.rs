use core_document::{Delta, Document, DocumentChange, DocumentError, Op, Range, attr};
use core_events::ChangeSource;
use std::time::{Duration, Instant};
use tracing::trace;

/// Maximum number of entries retained in undo history.
pub const UNDO_HISTORY_MAX: usize = 200;

/// Default window in which consecutive user edits merge into one entry.
pub const MERGE_DELAY: Duration = Duration::from_millis(1000);

/// Inverse-operation pair. `undo` applies to the state right after `redo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub undo: Delta,
    pub redo: Delta,
    pub selection_before: Option<Range>,
}

/// Result of stepping through history: the change applied to the document and
/// where the selection should land.
#[derive(Debug, Clone)]
pub struct HistoryStep {
    pub change: DocumentChange,
    pub selection: Option<Range>,
}

/// Delta-based undo/redo stacks.
///
/// Merge policy: a recorded change folds into the top entry unless a
/// [`cutoff`](Self::cutoff) happened since, the source switched between user
/// and programmatic, or (for user changes) the merge delay elapsed.
/// Programmatic changes merge regardless of delay so a streamed batch forms a
/// single entry. An entry whose merged redo delta changes nothing is dropped.
pub struct HistoryManager {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    last_recorded: Option<Instant>,
    last_source: Option<ChangeSource>,
    delay: Duration,
    max_depth: usize,
    entries_dropped: u64,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(MERGE_DELAY, UNDO_HISTORY_MAX)
    }
}

impl HistoryManager {
    pub fn new(delay: Duration, max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            last_recorded: None,
            last_source: None,
            delay,
            max_depth: max_depth.max(1),
            entries_dropped: 0,
        }
    }

    pub fn from_config(cfg: &core_config::HistoryConfig) -> Self {
        Self::new(cfg.delay(), cfg.max_depth)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }
    /// Entries discarded because their merged change was a no-op.
    pub fn entries_dropped(&self) -> u64 {
        self.entries_dropped
    }
    pub fn top(&self) -> Option<&HistoryEntry> {
        self.undo_stack.last()
    }

    /// Start a new undo boundary: the next recorded change opens a fresh entry.
    pub fn cutoff(&mut self) {
        self.last_recorded = None;
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), "cutoff");
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.last_recorded = None;
        self.last_source = None;
        trace!(target: "state.undo", "history_cleared");
    }

    pub fn record(&mut self, change: &DocumentChange, source: ChangeSource, selection_before: Option<Range>) {
        self.record_at(change, source, selection_before, Instant::now());
    }

    /// [`record`](Self::record) with an explicit clock reading.
    pub fn record_at(
        &mut self,
        change: &DocumentChange,
        source: ChangeSource,
        selection_before: Option<Range>,
        now: Instant,
    ) {
        if source == ChangeSource::Silent {
            self.transform(&change.delta);
            return;
        }
        if change.delta.is_noop() {
            return;
        }
        if !self.redo_stack.is_empty() {
            self.redo_stack.clear();
            trace!(target: "state.undo", "redo_cleared");
        }

        let mut undo = change.inverse.clone();
        let mut redo = change.delta.clone();
        let mut selection = selection_before;

        let mergeable = match (self.last_recorded, self.last_source) {
            (Some(at), Some(prev)) if prev == source => {
                source == ChangeSource::Api || now.saturating_duration_since(at) < self.delay
            }
            _ => false,
        };
        if mergeable && let Some(top) = self.undo_stack.pop() {
            undo = undo.compose(&top.undo);
            redo = top.redo.compose(&redo);
            selection = top.selection_before;
            trace!(target: "state.undo", undo_depth = self.undo_stack.len(), source = source.as_str(), "merge_entry");
        }
        self.last_recorded = Some(now);
        self.last_source = Some(source);

        if redo.is_noop() {
            self.entries_dropped += 1;
            trace!(target: "state.undo", undo_depth = self.undo_stack.len(), "noop_entry_dropped");
            return;
        }
        self.undo_stack.push(HistoryEntry {
            undo,
            redo,
            selection_before: selection,
        });
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), redo_depth = self.redo_stack.len(), source = source.as_str(), "push_entry");
        if self.undo_stack.len() > self.max_depth {
            let _ = self.undo_stack.remove(0);
            trace!(target: "state.undo", max_depth = self.max_depth, "stack_trimmed");
        }
    }

    /// Rebase both stacks over a change that is not itself recorded.
    pub fn transform(&mut self, delta: &Delta) {
        transform_stack(&mut self.undo_stack, delta, Direction::Undo);
        transform_stack(&mut self.redo_stack, delta, Direction::Redo);
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), redo_depth = self.redo_stack.len(), "stacks_transformed");
    }

    /// Apply the top undo entry to `doc`. `Ok(None)` when there is nothing to undo.
    /// A rejected delta leaves both the document and the stacks untouched.
    pub fn undo(&mut self, doc: &mut Document) -> Result<Option<HistoryStep>, DocumentError> {
        let Some(entry) = self.undo_stack.pop() else {
            return Ok(None);
        };
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), redo_depth = self.redo_stack.len(), "undo_pop");
        let change = match doc.apply_delta(&entry.undo) {
            Ok(change) => change,
            Err(e) => {
                self.undo_stack.push(entry);
                return Err(e);
            }
        };
        let selection = entry.selection_before;
        self.redo_stack.push(entry);
        self.last_recorded = None;
        Ok(Some(HistoryStep { change, selection }))
    }

    pub fn redo(&mut self, doc: &mut Document) -> Result<Option<HistoryStep>, DocumentError> {
        let Some(entry) = self.redo_stack.pop() else {
            return Ok(None);
        };
        trace!(target: "state.undo", redo_depth = self.redo_stack.len(), undo_depth = self.undo_stack.len(), "redo_pop");
        let change = match doc.apply_delta(&entry.redo) {
            Ok(change) => change,
            Err(e) => {
                self.redo_stack.push(entry);
                return Err(e);
            }
        };
        let selection = Some(Range::caret(last_change_index(&entry.redo)));
        self.undo_stack.push(entry);
        self.last_recorded = None;
        Ok(Some(HistoryStep { change, selection }))
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

// Walk from the most recent entry down. The delta that applies to the current
// state is rebased first; the remote change is then carried past it so it can
// rebase the entry's other half and the older entries.
fn transform_stack(stack: &mut Vec<HistoryEntry>, delta: &Delta, dir: Direction) {
    let mut remote = delta.clone();
    for i in (0..stack.len()).rev() {
        let entry = &stack[i];
        let (current, other) = match dir {
            Direction::Undo => (&entry.undo, &entry.redo),
            Direction::Redo => (&entry.redo, &entry.undo),
        };
        let rebased_current = remote.transform(current, true);
        let carried = current.transform(&remote, true);
        let rebased_other = carried.transform(other, true);
        let selection = entry.selection_before.map(|r| {
            let start = remote.transform_position(r.index, true);
            let end = remote.transform_position(r.end(), true);
            Range::new(start, end.saturating_sub(start))
        });
        remote = carried;
        if rebased_current.is_noop() {
            stack.remove(i);
            continue;
        }
        stack[i] = match dir {
            Direction::Undo => HistoryEntry {
                undo: rebased_current,
                redo: rebased_other,
                selection_before: selection,
            },
            Direction::Redo => HistoryEntry {
                undo: rebased_other,
                redo: rebased_current,
                selection_before: selection,
            },
        };
    }
}

/// Caret position right after the last insert or delete in `delta`. A
/// trailing line-format change leaves the caret before the formatted `\n`,
/// on the line it formatted.
fn last_change_index(delta: &Delta) -> usize {
    let mut index = 0;
    let mut change = 0;
    for op in &delta.ops {
        match op {
            Op::Insert { .. } => {
                index += op.len();
                change = index;
            }
            Op::Retain { attributes, .. } => {
                index += op.len();
                if !attributes.is_empty() {
                    let line_format = attributes.iter().any(|(key, _)| attr::is_block_key(key));
                    change = if line_format { index - 1 } else { index };
                }
            }
            Op::Delete { .. } => change = index,
        }
    }
    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_document::Attributes;
    use pretty_assertions::assert_eq;

    fn apply(doc: &mut Document, delta: Delta) -> DocumentChange {
        doc.apply_delta(&delta).unwrap()
    }

    #[test]
    fn user_edits_within_delay_merge() {
        let mut doc = Document::from_text("ab\n");
        let mut h = HistoryManager::default();
        let t0 = Instant::now();
        let c1 = apply(&mut doc, Delta::new().retain(2).insert("c"));
        h.record_at(&c1, ChangeSource::User, Some(Range::caret(2)), t0);
        let c2 = apply(&mut doc, Delta::new().retain(3).insert("d"));
        h.record_at(&c2, ChangeSource::User, Some(Range::caret(3)), t0 + Duration::from_millis(100));
        assert_eq!(h.undo_depth(), 1);
        let step = h.undo(&mut doc).unwrap().unwrap();
        assert_eq!(doc.text(), "ab\n");
        assert_eq!(step.selection, Some(Range::caret(2)));
    }

    #[test]
    fn delay_elapsed_starts_new_entry() {
        let mut doc = Document::from_text("ab\n");
        let mut h = HistoryManager::default();
        let t0 = Instant::now();
        let c1 = apply(&mut doc, Delta::new().retain(2).insert("c"));
        h.record_at(&c1, ChangeSource::User, None, t0);
        let c2 = apply(&mut doc, Delta::new().retain(3).insert("d"));
        h.record_at(&c2, ChangeSource::User, None, t0 + Duration::from_millis(1500));
        assert_eq!(h.undo_depth(), 2);
    }

    #[test]
    fn cutoff_and_source_switch_split_entries() {
        let mut doc = Document::from_text("ab\n");
        let mut h = HistoryManager::default();
        let t0 = Instant::now();
        let c1 = apply(&mut doc, Delta::new().retain(2).insert("c"));
        h.record_at(&c1, ChangeSource::User, None, t0);
        let c2 = apply(&mut doc, Delta::new().retain(3).insert("X"));
        h.record_at(&c2, ChangeSource::Api, None, t0);
        assert_eq!(h.undo_depth(), 2);
        h.cutoff();
        let c3 = apply(&mut doc, Delta::new().retain(4).insert("Y"));
        h.record_at(&c3, ChangeSource::Api, None, t0);
        assert_eq!(h.undo_depth(), 3);
    }

    #[test]
    fn api_changes_merge_regardless_of_delay() {
        let mut doc = Document::from_text("ab\n");
        let mut h = HistoryManager::default();
        let t0 = Instant::now();
        for (i, tok) in ["x", "y", "z"].iter().enumerate() {
            let c = apply(&mut doc, Delta::new().retain(2 + i).insert(tok));
            h.record_at(&c, ChangeSource::Api, None, t0 + Duration::from_secs(5 * i as u64));
        }
        assert_eq!(h.undo_depth(), 1);
        h.undo(&mut doc).unwrap();
        assert_eq!(doc.text(), "ab\n");
    }

    #[test]
    fn inserted_then_removed_batch_leaves_no_entry() {
        let mut doc = Document::from_text("ab\n");
        let mut h = HistoryManager::default();
        h.cutoff();
        let c1 = apply(&mut doc, Delta::new().retain(2).insert(" more"));
        h.record(&c1, ChangeSource::Api, None);
        let c2 = apply(&mut doc, Delta::new().retain(2).delete(5));
        h.record(&c2, ChangeSource::Api, None);
        assert_eq!(h.undo_depth(), 0);
        assert_eq!(h.entries_dropped(), 1);
    }

    #[test]
    fn undo_then_redo_round_trips() {
        let mut doc = Document::from_text("hello\n");
        let mut h = HistoryManager::default();
        let c = apply(&mut doc, Delta::new().retain(5).insert(" world"));
        h.record(&c, ChangeSource::User, Some(Range::caret(5)));
        h.undo(&mut doc).unwrap();
        assert_eq!(doc.text(), "hello\n");
        assert!(h.can_redo());
        let step = h.redo(&mut doc).unwrap().unwrap();
        assert_eq!(doc.text(), "hello world\n");
        assert_eq!(step.selection, Some(Range::caret(11)));

        // A delta that no longer fits is rejected and the entry stays put.
        assert!(h.undo(&mut Document::new()).is_err());
        assert_eq!(h.undo_depth(), 1);
    }

    #[test]
    fn redo_of_line_format_keeps_caret_on_that_line() {
        let mut doc = Document::from_text("Title\nBody\n");
        let mut h = HistoryManager::default();
        let c = apply(
            &mut doc,
            Delta::new().retain(5).retain_with(1, Attributes::new().with(attr::HEADER, 2u8)),
        );
        h.record(&c, ChangeSource::User, Some(Range::caret(0)));
        h.undo(&mut doc).unwrap();
        let step = h.redo(&mut doc).unwrap().unwrap();
        assert_eq!(step.selection, Some(Range::caret(5)));
        assert_eq!(doc.line_at(5).unwrap().index, 0);

        // Inline formats still land after the formatted run.
        let c = apply(&mut doc, Delta::new().retain_with(2, Attributes::new().with("bold", true)));
        h.cutoff();
        h.record(&c, ChangeSource::User, None);
        h.undo(&mut doc).unwrap();
        let step = h.redo(&mut doc).unwrap().unwrap();
        assert_eq!(step.selection, Some(Range::caret(2)));
    }

    #[test]
    fn new_record_clears_redo() {
        let mut doc = Document::from_text("a\n");
        let mut h = HistoryManager::default();
        let c = apply(&mut doc, Delta::new().insert("b"));
        h.record(&c, ChangeSource::User, None);
        h.undo(&mut doc).unwrap();
        let c = apply(&mut doc, Delta::new().insert("c"));
        h.record(&c, ChangeSource::User, None);
        assert!(!h.can_redo());
    }

    #[test]
    fn silent_change_rebases_stacks() {
        let mut doc = Document::from_text("abc\n");
        let mut h = HistoryManager::default();
        let c = apply(&mut doc, Delta::new().retain(3).insert("d"));
        h.record(&c, ChangeSource::User, None);
        let silent = apply(&mut doc, Delta::new().insert("__"));
        h.record(&silent, ChangeSource::Silent, None);
        assert_eq!(h.undo_depth(), 1);
        h.undo(&mut doc).unwrap();
        assert_eq!(doc.text(), "__abc\n");
    }

    #[test]
    fn silent_format_keeps_entries_valid() {
        let mut doc = Document::from_text("abc\n");
        let mut h = HistoryManager::default();
        let c = apply(&mut doc, Delta::new().retain(3).insert("d"));
        h.record(&c, ChangeSource::User, None);
        let silent = apply(
            &mut doc,
            Delta::new().retain(4).retain_with(1, Attributes::new().with("block-id", "b1")),
        );
        h.record(&silent, ChangeSource::Silent, None);
        h.undo(&mut doc).unwrap();
        assert_eq!(doc.text(), "abc\n");
    }

    #[test]
    fn stack_is_capped() {
        let mut doc = Document::new();
        let mut h = HistoryManager::new(MERGE_DELAY, 3);
        for _ in 0..5 {
            let c = apply(&mut doc, Delta::new().insert("x"));
            h.record(&c, ChangeSource::User, None);
            h.cutoff();
        }
        assert_eq!(h.undo_depth(), 3);
    }

    #[test]
    fn undo_on_empty_stack_is_none() {
        let mut doc = Document::new();
        let mut h = HistoryManager::default();
        assert!(h.undo(&mut doc).unwrap().is_none());
        assert!(h.redo(&mut doc).unwrap().is_none());
    }
}
