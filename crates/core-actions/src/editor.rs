use crate::{ActionError, Command};
use core_blocks::{AutosaveHandle, AutosaveStats, Block, BlockKind, BlockSynchronizer, spawn_autosave};
use core_cite::{CitationId, CitationManager, CitationStyle, ReconcileSummary, span_containing, span_ending_at};
use core_config::{AutosaveConfig, ConfigFile};
use core_document::{AttrValue, Attributes, Delta, Document, Range, attr};
use core_events::{
    ChangeSource, EditorEvent, EventReceiver, Notification, NotificationKind, TextChange,
};
use core_services::{
    BibliographyEntry, BibliographyStore, GenerationService, PersistenceService, WordCredits,
};
use core_state::{EditorState, HistoryManager};
use core_suggest::{StreamStep, SuggestionEngine};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Inline keys that never carry over to freshly typed text.
const NON_INHERITED: [&str; 5] = [
    attr::CITATION_ID,
    attr::CITATION_SOURCE,
    attr::CITATION_STYLE,
    attr::CITATION_TRAIL,
    attr::COLOR,
];

/// What one [`Editor::drain_events`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub changes: usize,
    pub reconciled: ReconcileSummary,
    pub snapshot_submitted: bool,
    /// The caret now sits where a continuation should be requested.
    pub should_suggest: bool,
}

/// One open document with its components and collaborators.
///
/// All mutation goes through here so the cross-cutting rules hold in one
/// place: user edits discard a live suggestion first, edits never cut a
/// citation span, and side effects (trigger evaluation, store
/// reconciliation, autosave) run from [`drain_events`](Self::drain_events)
/// after the mutation has returned.
pub struct Editor<G, C, B> {
    state: EditorState,
    events: EventReceiver,
    engine: SuggestionEngine,
    citations: CitationManager,
    blocks: BlockSynchronizer,
    autosave: Option<AutosaveHandle>,
    generator: G,
    credits: C,
    bibliography: B,
    queued: Vec<TextChange>,
    notifications: Vec<Notification>,
    unsaved: bool,
}

impl<G, C, B> Editor<G, C, B>
where
    G: GenerationService,
    C: WordCredits,
    B: BibliographyStore,
{
    pub fn new(
        document: Document,
        document_id: impl Into<String>,
        config: &ConfigFile,
        generator: G,
        credits: C,
        bibliography: B,
    ) -> Self {
        let (sink, events) = core_events::channel();
        let history = HistoryManager::from_config(&config.history);
        Self {
            state: EditorState::with_history(document, history, sink),
            events,
            engine: SuggestionEngine::new(config.suggestion.clone()),
            citations: CitationManager::from_config(document_id, &config.citation),
            blocks: BlockSynchronizer::from_config(&config.suggestion),
            autosave: None,
            generator,
            credits,
            bibliography,
            queued: Vec::new(),
            notifications: Vec::new(),
            unsaved: false,
        }
    }

    /// Start the autosave worker for this document. Requires a tokio runtime.
    pub fn attach_autosave<P>(&mut self, persistence: P, cfg: &AutosaveConfig) -> JoinHandle<AutosaveStats>
    where
        P: PersistenceService + 'static,
    {
        let (task, handle) = spawn_autosave(persistence, self.citations.document_id(), cfg);
        self.autosave = Some(handle);
        task
    }

    /// Stop feeding the autosave worker. The worker writes what it holds
    /// and exits once the handle is dropped.
    pub fn detach_autosave(&mut self) -> Option<AutosaveHandle> {
        self.autosave.take()
    }

    /// Load citation state for this document from the bibliography store.
    pub async fn hydrate(&mut self) -> Result<usize, ActionError> {
        Ok(self
            .citations
            .hydrate(self.state.document(), &self.bibliography)
            .await?)
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn document(&self) -> &Document {
        self.state.document()
    }

    pub fn selection(&self) -> Option<Range> {
        self.state.selection()
    }

    pub fn engine(&self) -> &SuggestionEngine {
        &self.engine
    }

    pub fn citations(&self) -> &CitationManager {
        &self.citations
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.decompose(&self.state)
    }

    pub fn serialize(&self) -> String {
        self.blocks.serialize(&self.state)
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn credits(&self) -> &C {
        &self.credits
    }

    pub fn bibliography(&self) -> &B {
        &self.bibliography
    }

    /// Content changed since the last autosave snapshot.
    pub fn is_dirty(&self) -> bool {
        self.unsaved
    }

    fn current_selection(&self) -> Result<Range, ActionError> {
        self.state.selection().ok_or(ActionError::NoSelection)
    }

    fn current_range(&self) -> Result<Range, ActionError> {
        let range = self.current_selection()?;
        if range.is_collapsed() {
            return Err(ActionError::EmptySelection);
        }
        Ok(range)
    }

    /// Discard a live suggestion before a user edit at `range`, mapping the
    /// range back onto the text without it.
    fn interrupt(&mut self, range: Range) -> Range {
        self.engine
            .interrupt_range(&mut self.state, range)
            .unwrap_or(range)
    }

    fn guard(&self, range: Range) -> Result<(), ActionError> {
        if let Err(e) = CitationManager::guard_edit(self.state.document(), range) {
            self.state.events().notify(Notification::new(
                NotificationKind::EditRejected,
                "citations can only be removed as a whole",
            ));
            return Err(e.into());
        }
        Ok(())
    }

    /// Type `text` over the selection. Formatting continues from the
    /// character before the caret, minus citation and suggestion markers.
    /// Returns the new caret.
    pub fn type_text(&mut self, text: &str) -> Result<usize, ActionError> {
        let selection = self.current_selection()?;
        let mut range = self.interrupt(selection);
        self.guard(range)?;
        if range.is_collapsed() {
            range = Range::caret(self.citations.guard_caret(&mut self.state, range.index)?);
        }
        let len = text.chars().count();
        if len == 0 && range.is_collapsed() {
            return Ok(range.index);
        }
        let (mut inherited, _) = self
            .state
            .document()
            .get_format(Range::caret(range.index))?
            .split_block();
        for key in NON_INHERITED {
            inherited.remove(key);
        }
        let delta = Delta::new()
            .retain(range.index)
            .delete(range.length)
            .insert_with(text, inherited);
        self.state.apply(&delta, ChangeSource::User)?;
        let caret = range.index + len;
        self.state
            .set_selection(Some(Range::caret(caret)), ChangeSource::User)?;
        trace!(target: "actions.dispatch", op = "type", len, replaced = range.length, "typed");
        Ok(caret)
    }

    /// Backspace. A caret touching a citation removes the whole citation.
    /// Returns `false` when there was nothing to delete.
    pub async fn delete_backward(&mut self) -> Result<bool, ActionError> {
        let selection = self.current_selection()?;
        let range = self.interrupt(selection);
        if !range.is_collapsed() {
            self.delete_range(range)?;
            return Ok(true);
        }
        if range.index == 0 {
            return Ok(false);
        }
        let doc = self.state.document();
        let touched = span_containing(doc, range.index).or_else(|| span_ending_at(doc, range.index));
        if let Some(span) = touched {
            self.citations
                .delete_citation(&mut self.state, &self.bibliography, &span.id)
                .await?;
            return Ok(true);
        }
        let at = range.index - 1;
        self.state.delete_text(at, 1, ChangeSource::User)?;
        self.state
            .set_selection(Some(Range::caret(at)), ChangeSource::User)?;
        trace!(target: "actions.dispatch", op = "delete_backward", at, "deleted");
        Ok(true)
    }

    /// Delete `range`. Citations covered whole go with it (the store catches
    /// up on the next drain); cutting into one is rejected.
    pub fn delete_range(&mut self, range: Range) -> Result<(), ActionError> {
        range.check(self.state.document().len())?;
        let range = self.interrupt(range);
        self.guard(range)?;
        if range.is_collapsed() {
            return Ok(());
        }
        self.state
            .delete_text(range.index, range.length, ChangeSource::User)?;
        self.state
            .set_selection(Some(Range::caret(range.index)), ChangeSource::User)?;
        trace!(target: "actions.dispatch", op = "delete_range", index = range.index, length = range.length, "deleted");
        Ok(())
    }

    /// Move the selection. Carets and selections inside a citation are
    /// pushed past it.
    pub fn set_selection(&mut self, range: Option<Range>) -> Result<Option<Range>, ActionError> {
        match range {
            Some(r) => Ok(Some(self.citations.normalize_selection(&mut self.state, r)?)),
            None => {
                self.state.set_selection(None, ChangeSource::User)?;
                Ok(None)
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Result<(), ActionError> {
        debug!(target: "actions.dispatch", command = command.as_str(), "execute");
        match command {
            Command::Heading1 => self.format_heading(1),
            Command::Heading2 => self.format_heading(2),
            Command::Heading3 => self.format_heading(3),
            Command::Paragraph => {
                self.format_lines(&[(attr::HEADER, AttrValue::Null), (attr::LIST, AttrValue::Null)])
            }
            Command::BulletList => self.format_lines(&[
                (attr::LIST, AttrValue::from("bullet")),
                (attr::HEADER, AttrValue::Null),
            ]),
            Command::OrderedList => self.format_lines(&[
                (attr::LIST, AttrValue::from("ordered")),
                (attr::HEADER, AttrValue::Null),
            ]),
            Command::Bold => self.toggle_inline(attr::BOLD),
            Command::Italic => self.toggle_inline(attr::ITALIC),
            Command::Underline => self.toggle_inline(attr::UNDERLINE),
            Command::Link(url) => {
                let range = self.current_range()?;
                self.format_inline(range, attr::LINK, AttrValue::from(url))
            }
            Command::Unlink => {
                let range = self.current_range()?;
                self.format_inline(range, attr::LINK, AttrValue::Null)
            }
            Command::InsertTable => {
                self.engine.cancel(&mut self.state);
                let caret = self.state.selection().map_or(0, |r| r.index);
                let blocks = self.blocks.decompose(&self.state);
                let after = blocks
                    .iter()
                    .position(|b| caret < b.range.end())
                    .unwrap_or(blocks.len().saturating_sub(1));
                self.blocks
                    .insert_block(&mut self.state, after, BlockKind::Table)?;
                Ok(())
            }
            Command::Undo => {
                self.engine.cancel(&mut self.state);
                if !self.state.undo()? {
                    trace!(target: "actions.dispatch", "undo_stack_empty");
                }
                Ok(())
            }
            Command::Redo => {
                self.engine.cancel(&mut self.state);
                if !self.state.redo()? {
                    trace!(target: "actions.dispatch", "redo_stack_empty");
                }
                Ok(())
            }
        }
    }

    fn format_heading(&mut self, level: u8) -> Result<(), ActionError> {
        self.format_lines(&[
            (attr::HEADER, AttrValue::from(level)),
            (attr::LIST, AttrValue::Null),
        ])
    }

    /// Set line formats on every line the selection touches, as one step.
    fn format_lines(&mut self, formats: &[(&str, AttrValue)]) -> Result<(), ActionError> {
        self.engine.cancel(&mut self.state);
        let range = self.current_selection()?;
        let doc = self.state.document();
        let mut delta: Option<Delta> = None;
        for (name, value) in formats {
            let step = doc.format_line_delta(range.index, range.length, name, value.clone())?;
            delta = Some(match delta {
                Some(acc) => acc.compose(&step),
                None => step,
            });
        }
        let Some(delta) = delta else {
            return Ok(());
        };
        self.state.cutoff();
        self.state.apply(&delta, ChangeSource::User)?;
        self.state.cutoff();
        Ok(())
    }

    fn toggle_inline(&mut self, key: &str) -> Result<(), ActionError> {
        let range = self.current_range()?;
        let active = self.state.document().get_format(range)?.is_set(key);
        let value = if active {
            AttrValue::Null
        } else {
            AttrValue::Bool(true)
        };
        self.format_inline(range, key, value)
    }

    fn format_inline(&mut self, range: Range, key: &str, value: AttrValue) -> Result<(), ActionError> {
        self.engine.cancel(&mut self.state);
        let attrs = Attributes::new().with(key, value);
        self.state.cutoff();
        self.state
            .format_text(range.index, range.length, &attrs, ChangeSource::User)?;
        self.state.cutoff();
        Ok(())
    }

    pub async fn request_suggestion(&mut self) -> Result<(), ActionError> {
        Ok(self.engine.request(&mut self.state, &self.credits).await?)
    }

    /// Stream the requested suggestion to its end.
    pub async fn stream_suggestion(&mut self) -> Result<StreamStep, ActionError> {
        Ok(self
            .engine
            .stream_to_end(&mut self.state, &self.generator)
            .await?)
    }

    /// Returns the number of words debited.
    pub async fn accept_suggestion(&mut self) -> Result<u64, ActionError> {
        Ok(self.engine.accept(&mut self.state, &self.credits).await?)
    }

    pub fn decline_suggestion(&mut self) -> Result<(), ActionError> {
        Ok(self.engine.decline(&mut self.state)?)
    }

    /// Discard the live suggestion and stream a fresh one for the same request.
    pub async fn regenerate_suggestion(&mut self) -> Result<StreamStep, ActionError> {
        self.engine
            .regenerate(&mut self.state, &self.credits, &self.generator)
            .await?;
        self.stream_suggestion().await
    }

    pub fn cancel_suggestion(&mut self) -> bool {
        self.engine.cancel(&mut self.state)
    }

    /// Cite `entry` after the current selection.
    pub async fn insert_citation(&mut self, entry: BibliographyEntry) -> Result<CitationId, ActionError> {
        let selection = self.current_selection()?;
        let selection = self.interrupt(selection);
        Ok(self
            .citations
            .insert_citation(&mut self.state, &self.bibliography, selection, entry)
            .await?)
    }

    pub async fn delete_citation(&mut self, id: &str) -> Result<(), ActionError> {
        self.engine.cancel(&mut self.state);
        Ok(self
            .citations
            .delete_citation(&mut self.state, &self.bibliography, id)
            .await?)
    }

    /// Rewrite every citation for `style`. The rewrite is suppressed for
    /// per-change side effects, so one snapshot covers it.
    pub fn change_citation_style(&mut self, style: CitationStyle) -> Result<usize, ActionError> {
        self.engine.cancel(&mut self.state);
        let rewritten = self.citations.reformat_all(&mut self.state, style)?;
        if rewritten > 0 {
            self.unsaved = true;
        }
        Ok(rewritten)
    }

    pub fn insert_block(&mut self, after_index: usize, kind: BlockKind) -> Result<String, ActionError> {
        self.engine.cancel(&mut self.state);
        Ok(self.blocks.insert_block(&mut self.state, after_index, kind)?)
    }

    pub fn delete_block(&mut self, index: usize) -> Result<Block, ActionError> {
        self.engine.cancel(&mut self.state);
        Ok(self.blocks.delete_block(&mut self.state, index)?)
    }

    pub fn move_block(&mut self, from: usize, to: usize) -> Result<(), ActionError> {
        self.engine.cancel(&mut self.state);
        Ok(self.blocks.move_block(&mut self.state, from, to)?)
    }

    /// Generate a table after block `after_index`; returns its block index.
    pub async fn generate_table(&mut self, after_index: usize) -> Result<usize, ActionError> {
        self.engine.cancel(&mut self.state);
        Ok(self
            .blocks
            .generate_table(&mut self.state, &self.generator, after_index)
            .await?)
    }

    fn pump(&mut self) {
        for event in self.events.drain() {
            match event {
                EditorEvent::TextChanged(change) => self.queued.push(change),
                EditorEvent::SelectionChanged { .. } => {}
                EditorEvent::Notification(n) => self.notifications.push(n),
            }
        }
    }

    /// Run the deferred side effects of everything committed since the last
    /// call: trigger observation, bibliography reconciliation and an
    /// autosave snapshot. Snapshots wait while a suggestion is live so
    /// pending text is never persisted.
    pub async fn drain_events(&mut self) -> DrainReport {
        self.pump();
        let changes = std::mem::take(&mut self.queued);
        let now = Instant::now();
        let mut report = DrainReport {
            changes: changes.len(),
            ..DrainReport::default()
        };
        let mut touched = false;
        let mut user_edit = false;
        for change in &changes {
            user_edit |= self.engine.observe(change, now);
            if change.source != ChangeSource::Silent && !change.suppressed {
                touched = true;
            }
        }
        if touched {
            self.unsaved = true;
            match self
                .citations
                .reconcile(&self.state, &self.bibliography)
                .await
            {
                Ok(summary) => report.reconciled = summary,
                Err(e) => warn!(target: "actions.dispatch", error = %e, "reconcile_failed"),
            }
        }
        if self.unsaved
            && !self.engine.phase().is_live()
            && let Some(handle) = &self.autosave
        {
            if let Err(e) = self.blocks.ensure_block_ids(&mut self.state) {
                warn!(target: "actions.dispatch", error = %e, "block_ids_failed");
            }
            report.snapshot_submitted = handle.submit(self.blocks.serialize(&self.state));
            self.unsaved = !report.snapshot_submitted;
        }
        report.should_suggest = user_edit && self.engine.should_trigger(&self.state, now);
        // Reconciliation may have raised notifications; silent id
        // assignment changes stay queued and are skipped next time.
        self.pump();
        trace!(target: "actions.dispatch", changes = report.changes, snapshot = report.snapshot_submitted, "events_drained");
        report
    }

    /// Drain, then wait until the autosave worker has written.
    pub async fn flush(&mut self) -> DrainReport {
        let report = self.drain_events().await;
        if let Some(handle) = &self.autosave {
            handle.flush().await;
        }
        report
    }

    /// Notifications raised since the last call, oldest first.
    pub fn notifications(&mut self) -> Vec<Notification> {
        self.pump();
        std::mem::take(&mut self.notifications)
    }
}
