use crate::span::{self, CitationSpan};
use crate::style::{CitationStyle, author_date_form, numeric_form};
use crate::{CitationId, CiteError};
use core_config::CitationConfig;
use core_document::{Attributes, Delta, Document, Range, attr};
use core_events::{ChangeSource, Notification, NotificationKind};
use core_services::{BibliographyEntry, BibliographyStore, CitationRecord, ServiceError};
use core_state::{EditorState, transform_range};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Punctuation guaranteed after a span.
pub const TRAIL: &str = ". ";

/// Local view of one citation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub id: CitationId,
    pub in_text: String,
    pub style: CitationStyle,
    pub entry_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Ids cascaded to the store as deleted.
    pub deleted: usize,
    /// Spans brought back (by undo, paste) and re-created in the store.
    pub restored: usize,
}

/// What is missing after a span for it to be followed by [`TRAIL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrailGap {
    None,
    Space,
    Full,
}

fn trail_gap(doc: &Document, at: usize) -> TrailGap {
    let available = doc.len().saturating_sub(at).min(2);
    let next = doc
        .get_text(Range::new(at, available))
        .unwrap_or_default();
    let mut chars = next.chars();
    match (chars.next(), chars.next()) {
        (Some('.'), Some(' ')) => TrailGap::None,
        (Some('.'), _) => TrailGap::Space,
        _ => TrailGap::Full,
    }
}

/// Append the ops closing `gap` to a delta positioned just before it.
fn push_trail(delta: Delta, gap: TrailGap, id: &str) -> Delta {
    let tagged = Attributes::new().with(attr::CITATION_TRAIL, id);
    match gap {
        TrailGap::None => delta,
        TrailGap::Space => delta.retain(1).insert_with(" ", tagged),
        TrailGap::Full => delta.insert_with(TRAIL, tagged),
    }
}

fn span_attributes(id: &str, entry_id: Option<&str>, style: CitationStyle) -> Attributes {
    let mut attrs = Attributes::new()
        .with(attr::CITATION_ID, id)
        .with(attr::CITATION_STYLE, style.as_str());
    if let Some(entry_id) = entry_id {
        attrs.set(attr::CITATION_SOURCE, entry_id);
    }
    attrs
}

/// Owns local citation state and every document write touching citations.
///
/// The document stays the source of truth for where spans are; this type
/// keeps what the document cannot: bibliography entries (for author-date
/// forms) and store deletes that still need to go out.
#[derive(Debug)]
pub struct CitationManager {
    document_id: String,
    style: CitationStyle,
    citations: BTreeMap<CitationId, Citation>,
    entries: BTreeMap<String, BibliographyEntry>,
    pending_deletes: BTreeSet<CitationId>,
}

impl CitationManager {
    pub fn new(document_id: impl Into<String>, style: CitationStyle) -> Self {
        Self {
            document_id: document_id.into(),
            style,
            citations: BTreeMap::new(),
            entries: BTreeMap::new(),
            pending_deletes: BTreeSet::new(),
        }
    }

    /// Unknown style names fall back to numeric.
    pub fn from_config(document_id: impl Into<String>, cfg: &CitationConfig) -> Self {
        let style = cfg.style.parse().unwrap_or_else(|e: CiteError| {
            warn!(target: "cite", error = %e, "config_style_fallback");
            CitationStyle::Numeric
        });
        Self::new(document_id, style)
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }
    pub fn style(&self) -> CitationStyle {
        self.style
    }
    pub fn citations(&self) -> impl Iterator<Item = &Citation> {
        self.citations.values()
    }
    pub fn get(&self, id: &str) -> Option<&Citation> {
        self.citations.get(id)
    }
    pub fn entry(&self, entry_id: &str) -> Option<&BibliographyEntry> {
        self.entries.get(entry_id)
    }
    pub fn pending_deletes(&self) -> impl Iterator<Item = &CitationId> {
        self.pending_deletes.iter()
    }

    /// Make an entry known for author-date rendering without touching the store.
    pub fn register_entry(&mut self, entry: BibliographyEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    fn form_for(&self, style: CitationStyle, number: usize, entry: &BibliographyEntry) -> String {
        match style {
            CitationStyle::Numeric => numeric_form(number),
            CitationStyle::AuthorDate => author_date_form(entry),
        }
    }

    /// Cite `entry` at the end of `selection`.
    ///
    /// The entry is persisted first; a store failure leaves the document
    /// untouched. The span and its trailing punctuation land as one undo step
    /// and the caret ends up after the punctuation.
    pub async fn insert_citation<S: BibliographyStore>(
        &mut self,
        state: &mut EditorState,
        store: &S,
        selection: Range,
        mut entry: BibliographyEntry,
    ) -> Result<CitationId, CiteError> {
        selection.check(state.document().len())?;
        if state.is_reformatting() {
            return Err(core_state::EditError::Busy.into());
        }
        let at = selection.end();
        if let Some(span) = span::span_containing(state.document(), at) {
            return Err(CiteError::InsideCitation {
                id: span.id,
                index: at,
            });
        }

        let id = CitationId::new();
        let number = span::ordered_ids(state.document()).len() + 1;
        let in_text = self.form_for(self.style, number, &entry);
        if entry.document_id.is_empty() {
            entry.document_id = self.document_id.clone();
        }

        let record = CitationRecord {
            citation_id: id.to_string(),
            entry: entry.clone(),
        };
        if let Err(e) = store.create(record).await {
            warn!(target: "cite", citation_id = %id, error = %e, "store_create_failed");
            state.events().notify(Notification::new(
                NotificationKind::CitationRejected,
                format!("citation could not be saved: {e}"),
            ));
            return Err(e.into());
        }

        let span_len = in_text.chars().count();
        let delta = Delta::new().retain(at).insert_with(
            &in_text,
            span_attributes(id.as_str(), Some(&entry.id), self.style),
        );
        let delta = push_trail(delta, trail_gap(state.document(), at), id.as_str());

        state.cutoff();
        if let Err(e) = state.apply(&delta, ChangeSource::User) {
            // Keep the store in step with the document.
            if let Err(cleanup) = store.delete(id.as_str()).await {
                warn!(target: "cite", citation_id = %id, error = %cleanup, "store_rollback_failed");
                self.pending_deletes.insert(id.clone());
            }
            return Err(e.into());
        }
        state.cutoff();
        let caret = at + span_len + TRAIL.chars().count();
        state.set_selection(Some(Range::caret(caret)), ChangeSource::User)?;

        info!(target: "cite", citation_id = %id, style = self.style.as_str(), at, "citation_inserted");
        self.citations.insert(
            id.clone(),
            Citation {
                id: id.clone(),
                in_text,
                style: self.style,
                entry_id: entry.id.clone(),
            },
        );
        self.entries.insert(entry.id.clone(), entry);
        Ok(id)
    }

    /// Apply caret protection and return the caret to use.
    ///
    /// Inside a span the caret is pushed past the span and its punctuation.
    /// At a span's trailing edge the punctuation is inserted if missing and
    /// the caret advanced past it. Anywhere else the caret is applied as is.
    pub fn guard_caret(&mut self, state: &mut EditorState, caret: usize) -> Result<usize, CiteError> {
        let doc = state.document();
        let span = match span::span_containing(doc, caret) {
            Some(span) => {
                debug!(target: "cite", citation_id = %span.id, caret, "caret_inside_span");
                span
            }
            None => match span::span_ending_at(doc, caret) {
                Some(span) => span,
                None => {
                    state.set_selection(Some(Range::caret(caret)), ChangeSource::User)?;
                    return Ok(caret);
                }
            },
        };
        let end = span.range.end();
        let gap = trail_gap(doc, end);
        if gap != TrailGap::None {
            debug!(target: "cite", citation_id = %span.id, "trail_inserted");
            let trail = push_trail(Delta::new().retain(end), gap, &span.id);
            state.apply(&trail, ChangeSource::Api)?;
        }
        let moved = end + TRAIL.chars().count();
        state.set_selection(Some(Range::caret(moved)), ChangeSource::User)?;
        Ok(moved)
    }

    /// Reject an edit touching a span's interior. Inserting at a caret is
    /// rejected strictly inside a span; replacing or deleting a range is
    /// rejected when it cuts a span instead of covering it whole.
    pub fn guard_edit(doc: &Document, range: Range) -> Result<(), CiteError> {
        for span in span::spans(doc) {
            let cuts = if range.is_collapsed() {
                span.range.strictly_contains(range.index)
            } else {
                span.range.intersects(&range) && !range.contains_range(&span.range)
            };
            if cuts {
                debug!(target: "cite", citation_id = %span.id, index = range.index, length = range.length, "edit_rejected");
                return Err(CiteError::InsideCitation {
                    id: span.id,
                    index: range.index.max(span.range.index),
                });
            }
        }
        Ok(())
    }

    /// Apply `range` as the selection, normalizing one that falls wholly
    /// inside a span to a caret after the span and its punctuation.
    pub fn normalize_selection(
        &mut self,
        state: &mut EditorState,
        range: Range,
    ) -> Result<Range, CiteError> {
        range.check(state.document().len())?;
        if range.is_collapsed() {
            return self.guard_caret(state, range.index).map(Range::caret);
        }
        let inside = span::spans(state.document())
            .into_iter()
            .find(|s| s.range.contains_range(&range) && s.range != range);
        if let Some(span) = inside {
            return self
                .guard_caret(state, span.range.end())
                .map(Range::caret);
        }
        state.set_selection(Some(range), ChangeSource::User)?;
        Ok(range)
    }

    /// Rewrite every span for `style` as one undo step. Returns the number of
    /// spans rewritten; spans already in the target form are left alone.
    pub fn reformat_all(
        &mut self,
        state: &mut EditorState,
        style: CitationStyle,
    ) -> Result<usize, CiteError> {
        let found = span::spans(state.document());
        let numbers: HashMap<String, usize> = span::ordered_ids(state.document())
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i + 1))
            .collect();

        let mut delta = Delta::new();
        let mut cursor = 0usize;
        let mut rewritten: Vec<(String, String)> = Vec::new();
        for s in &found {
            let Some(form) = self.render(s, style, &numbers) else {
                warn!(target: "cite", citation_id = %s.id, "entry_unknown_span_kept");
                continue;
            };
            if form == s.text && s.style == Some(style) {
                continue;
            }
            let entry_id = s
                .entry_id
                .clone()
                .or_else(|| self.citations.get(s.id.as_str()).map(|c| c.entry_id.clone()));
            delta = delta
                .retain(s.range.index - cursor)
                .delete(s.range.length)
                .insert_with(&form, span_attributes(&s.id, entry_id.as_deref(), style));
            cursor = s.range.end();
            rewritten.push((s.id.clone(), form));
        }

        self.style = style;
        if rewritten.is_empty() {
            debug!(target: "cite", style = style.as_str(), "reformat_nothing_to_do");
            return Ok(0);
        }

        let selection = state
            .selection()
            .map(|r| transform_range(r, &delta, false));
        state.reformat(|s| s.apply(&delta, ChangeSource::Api))?;
        if selection.is_some() {
            state.set_selection(selection, ChangeSource::Api)?;
        }

        for (id, form) in &rewritten {
            if let Some(c) = self.citations.get_mut(id.as_str()) {
                c.in_text = form.clone();
                c.style = style;
            }
        }
        info!(target: "cite", style = style.as_str(), rewritten = rewritten.len(), "reformat_complete");
        Ok(rewritten.len())
    }

    fn render(
        &self,
        s: &CitationSpan,
        style: CitationStyle,
        numbers: &HashMap<String, usize>,
    ) -> Option<String> {
        match style {
            CitationStyle::Numeric => numbers.get(&s.id).map(|n| numeric_form(*n)),
            CitationStyle::AuthorDate => {
                let entry_id = s
                    .entry_id
                    .as_deref()
                    .or_else(|| self.citations.get(s.id.as_str()).map(|c| c.entry_id.as_str()))?;
                self.entries.get(entry_id).map(author_date_form)
            }
        }
    }

    /// Remove every span with `id` plus the punctuation auto-inserted right
    /// after it, then cascade the delete to the store.
    ///
    /// A store failure is reported and queued for [`reconcile`](Self::reconcile);
    /// the document change stands.
    pub async fn delete_citation<S: BibliographyStore>(
        &mut self,
        state: &mut EditorState,
        store: &S,
        id: &str,
    ) -> Result<(), CiteError> {
        let doc = state.document();
        let found: Vec<CitationSpan> = span::spans(doc).into_iter().filter(|s| s.id == id).collect();
        if found.is_empty() && !self.citations.contains_key(id) {
            return Err(CiteError::NotFound(id.to_string()));
        }
        let trails: Vec<Range> = span::trails(doc)
            .into_iter()
            .filter(|t| t.id == id)
            .map(|t| t.range)
            .collect();

        // The trail may sit right after the span or after a period the user
        // typed there; only characters tagged with this id go.
        let mut doomed: Vec<Range> = Vec::new();
        for s in &found {
            doomed.push(s.range);
            let end = s.range.end();
            doomed.extend(trails.iter().filter(|t| t.index == end || t.index == end + 1));
        }
        doomed.sort_by_key(|r| r.index);
        doomed.dedup();

        let mut delta = Delta::new();
        let mut cursor = 0usize;
        for r in &doomed {
            if r.index < cursor {
                continue;
            }
            delta = delta.retain(r.index - cursor).delete(r.length);
            cursor = r.end();
        }
        if !found.is_empty() {
            state.cutoff();
            state.apply(&delta, ChangeSource::User)?;
            state.cutoff();
        }

        let id = CitationId::from(id);
        self.citations.remove(&id);
        info!(target: "cite", citation_id = %id, spans = found.len(), "citation_deleted");
        self.cascade_delete(state, store, id).await;
        Ok(())
    }

    async fn cascade_delete<S: BibliographyStore>(
        &mut self,
        state: &EditorState,
        store: &S,
        id: CitationId,
    ) -> bool {
        match store.delete(id.as_str()).await {
            Ok(()) | Err(ServiceError::NotFound(_)) => {
                self.pending_deletes.remove(&id);
                true
            }
            Err(e) => {
                warn!(target: "cite", citation_id = %id, error = %e, "store_delete_failed");
                state.events().notify(Notification::new(
                    NotificationKind::CitationRejected,
                    format!("citation removal not saved yet: {e}"),
                ));
                self.pending_deletes.insert(id);
                false
            }
        }
    }

    /// Bring the store in line with the document after free-form edits.
    ///
    /// Citations whose spans are gone are deleted from the store; spans that
    /// came back with a known entry (undo of a deletion) are re-created.
    /// Deletes that failed earlier are retried.
    pub async fn reconcile<S: BibliographyStore>(
        &mut self,
        state: &EditorState,
        store: &S,
    ) -> Result<ReconcileSummary, CiteError> {
        let mut summary = ReconcileSummary::default();
        let found = span::spans(state.document());
        let present: BTreeSet<&str> = found.iter().map(|s| s.id.as_str()).collect();

        let gone: Vec<CitationId> = self
            .citations
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            self.citations.remove(&id);
            self.pending_deletes.insert(id);
        }

        for s in &found {
            if self.citations.contains_key(s.id.as_str()) {
                continue;
            }
            let Some(entry) = s.entry_id.as_deref().and_then(|e| self.entries.get(e)).cloned() else {
                continue;
            };
            let id = CitationId::from(s.id.as_str());
            self.pending_deletes.remove(&id);
            let record = CitationRecord {
                citation_id: s.id.clone(),
                entry: entry.clone(),
            };
            if let Err(e) = store.create(record).await {
                warn!(target: "cite", citation_id = %id, error = %e, "store_restore_failed");
                continue;
            }
            self.citations.insert(
                id.clone(),
                Citation {
                    id,
                    in_text: s.text.clone(),
                    style: s.style.unwrap_or(self.style),
                    entry_id: entry.id,
                },
            );
            summary.restored += 1;
        }

        let pending: Vec<CitationId> = self
            .pending_deletes
            .iter()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        for id in pending {
            if self.cascade_delete(state, store, id).await {
                summary.deleted += 1;
            }
        }
        if summary != ReconcileSummary::default() {
            info!(target: "cite", deleted = summary.deleted, restored = summary.restored, "reconciled");
        }
        Ok(summary)
    }

    /// Load local state for this document from the store. Records with no
    /// span in `doc` are kept so the next [`reconcile`](Self::reconcile)
    /// removes them.
    pub async fn hydrate<S: BibliographyStore>(
        &mut self,
        doc: &Document,
        store: &S,
    ) -> Result<usize, CiteError> {
        let records = store.list_by_document(&self.document_id).await?;
        let found = span::spans(doc);
        let count = records.len();
        for record in records {
            let s = found.iter().find(|s| s.id == record.citation_id);
            let id = CitationId::from(record.citation_id);
            self.citations.insert(
                id.clone(),
                Citation {
                    id,
                    in_text: s.map(|s| s.text.clone()).unwrap_or_default(),
                    style: s.and_then(|s| s.style).unwrap_or(self.style),
                    entry_id: record.entry.id.clone(),
                },
            );
            self.entries.insert(record.entry.id.clone(), record.entry);
        }
        debug!(target: "cite", document_id = %self.document_id, count, "hydrated");
        Ok(count)
    }
}
