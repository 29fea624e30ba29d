use crate::block::{Block, BlockKind, decompose};
use crate::markup;
use crate::table::parse_pipe_table;
use crate::BlockError;
use core_config::SuggestionConfig;
use core_document::{Attributes, Delta, Embed, Range, TableData, attr};
use core_events::{ChangeSource, Notification, NotificationKind};
use core_services::{GenerationKind, GenerationRequest, GenerationService, SuggestionContext};
use core_state::EditorState;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shape of a freshly inserted table.
pub const DEFAULT_TABLE_ROWS: usize = 2;
pub const DEFAULT_TABLE_COLS: usize = 2;

fn new_block_id() -> String {
    Uuid::new_v4().to_string()
}

enum NewBlock {
    Line(Attributes),
    Table(TableData),
}

impl NewBlock {
    fn for_kind(kind: BlockKind, id: &str) -> Result<Self, BlockError> {
        let line = Attributes::new().with(attr::BLOCK_ID, id);
        Ok(match kind {
            BlockKind::Heading(level) => NewBlock::Line(line.with(attr::HEADER, level.clamp(1, 3))),
            BlockKind::Paragraph => NewBlock::Line(line),
            BlockKind::List(list) => NewBlock::Line(line.with(attr::LIST, list.as_str())),
            BlockKind::Table => {
                NewBlock::Table(TableData::blank(DEFAULT_TABLE_ROWS, DEFAULT_TABLE_COLS))
            }
            BlockKind::Embed => return Err(BlockError::Unsupported(kind)),
        })
    }

    fn push_onto(self, delta: Delta, id: &str) -> Delta {
        match self {
            NewBlock::Line(line) => delta.insert_with("\n", line),
            NewBlock::Table(table) => delta
                .insert_embed(Embed::Table(table), Attributes::new())
                .insert_with("\n", Attributes::new().with(attr::BLOCK_ID, id)),
        }
    }
}

/// Structural editing over the block view. Every operation re-derives the
/// blocks from the document first and lands as a single undo step.
#[derive(Debug, Clone)]
pub struct BlockSynchronizer {
    language: String,
    tone: Option<String>,
}

impl Default for BlockSynchronizer {
    fn default() -> Self {
        Self::from_config(&SuggestionConfig::default())
    }
}

impl BlockSynchronizer {
    pub fn from_config(cfg: &SuggestionConfig) -> Self {
        Self {
            language: cfg.language.clone(),
            tone: cfg.tone.clone(),
        }
    }

    pub fn decompose(&self, state: &EditorState) -> Vec<Block> {
        decompose(state.document())
    }

    pub fn serialize(&self, state: &EditorState) -> String {
        markup::serialize(state.document())
    }

    fn block_at(blocks: &[Block], index: usize) -> Result<&Block, BlockError> {
        blocks.get(index).ok_or(BlockError::OutOfBounds {
            index,
            len: blocks.len(),
        })
    }

    /// Give every line a unique `block-id`. Runs as a `Silent` change so it
    /// never shows up in undo history. Returns how many ids were assigned.
    pub fn ensure_block_ids(&self, state: &mut EditorState) -> Result<usize, BlockError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut delta = Delta::new();
        let mut cursor = 0usize;
        let mut assigned = 0usize;
        for line in state.document().lines() {
            let unique = match line.attributes.get_str(attr::BLOCK_ID) {
                Some(id) if !id.is_empty() => seen.insert(id.to_string()),
                _ => false,
            };
            if unique {
                continue;
            }
            let nl = line.newline_index();
            delta = delta
                .retain(nl - cursor)
                .retain_with(1, Attributes::new().with(attr::BLOCK_ID, new_block_id()));
            cursor = nl + 1;
            assigned += 1;
        }
        if assigned > 0 {
            state.apply(&delta, ChangeSource::Silent)?;
            debug!(target: "blocks.sync", assigned, "block_ids_assigned");
        }
        Ok(assigned)
    }

    /// Insert an empty block of `kind` right after block `after_index` and
    /// return its id.
    ///
    /// A list line placed next to a list of the same kind becomes a new item
    /// of that list rather than a block of its own; the returned id is then
    /// the item's line id and the block count is unchanged.
    pub fn insert_block(
        &self,
        state: &mut EditorState,
        after_index: usize,
        kind: BlockKind,
    ) -> Result<String, BlockError> {
        let id = new_block_id();
        let new = NewBlock::for_kind(kind, &id)?;
        let joins_list = matches!(kind, BlockKind::List(_)) && {
            let blocks = decompose(state.document());
            [Some(after_index), after_index.checked_add(1)]
                .into_iter()
                .flatten()
                .any(|i| blocks.get(i).is_some_and(|b| b.kind == kind))
        };
        self.insert_new(state, after_index, new, &id)?;
        if joins_list {
            debug!(target: "blocks.sync", %kind, after_index, block_id = %id, "list_item_joined");
        } else {
            info!(target: "blocks.sync", %kind, after_index, block_id = %id, "block_inserted");
        }
        Ok(id)
    }

    fn insert_new(
        &self,
        state: &mut EditorState,
        after_index: usize,
        new: NewBlock,
        id: &str,
    ) -> Result<usize, BlockError> {
        let blocks = decompose(state.document());
        let at = Self::block_at(&blocks, after_index)?.range.end();
        let delta = new.push_onto(Delta::new().retain(at), id);
        state.cutoff();
        state.apply(&delta, ChangeSource::User)?;
        state.cutoff();
        state.set_selection(Some(Range::caret(at)), ChangeSource::User)?;
        Ok(at)
    }

    /// Remove block `index` and return what it held. The document keeps its
    /// final line break: removing the last block folds the previous block's
    /// line format onto it, and removing the only block leaves an empty
    /// paragraph.
    pub fn delete_block(&self, state: &mut EditorState, index: usize) -> Result<Block, BlockError> {
        let doc = state.document();
        let blocks = decompose(doc);
        let block = Self::block_at(&blocks, index)?.clone();
        let range = block.range;
        let delta = if index + 1 < blocks.len() {
            Delta::new().retain(range.index).delete(range.length)
        } else {
            let last = range.end() - 1;
            let final_attrs = doc
                .line_at(last)
                .map(|l| l.attributes)
                .unwrap_or_default();
            if index == 0 {
                Delta::new()
                    .delete(last)
                    .retain_with(1, Attributes::diff(&final_attrs, &Attributes::new()))
                    .chop()
            } else {
                let prev_attrs = doc
                    .line_at(range.index - 1)
                    .map(|l| l.attributes)
                    .unwrap_or_default();
                Delta::new()
                    .retain(range.index - 1)
                    .delete(range.length)
                    .retain_with(1, Attributes::diff(&final_attrs, &prev_attrs))
                    .chop()
            }
        };
        state.cutoff();
        state.apply(&delta, ChangeSource::User)?;
        state.cutoff();
        info!(target: "blocks.sync", index, kind = %block.kind, "block_deleted");
        Ok(block)
    }

    /// Move block `from` so that it ends up at position `to` of the block list.
    pub fn move_block(&self, state: &mut EditorState, from: usize, to: usize) -> Result<(), BlockError> {
        let doc = state.document();
        let blocks = decompose(doc);
        let block = Self::block_at(&blocks, from)?;
        Self::block_at(&blocks, to)?;
        if from == to {
            return Ok(());
        }
        let others: Vec<&Block> = blocks
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != from)
            .map(|(_, b)| b)
            .collect();
        let before = others.get(to).map(|b| b.range.index).unwrap_or(doc.len());
        let target = if before > block.range.index {
            before - block.range.length
        } else {
            before
        };
        let remove = Delta::new()
            .retain(block.range.index)
            .delete(block.range.length);
        let insert = Delta::new().retain(target).concat(block.content.clone());
        let delta = remove.compose(&insert);

        state.cutoff();
        state.apply(&delta, ChangeSource::User)?;
        state.cutoff();
        info!(target: "blocks.sync", from, to, "block_moved");
        Ok(())
    }

    /// Ask the generation service for a table about the block at
    /// `after_index` (with the nearest heading above it as context) and
    /// splice it in after that block. Returns the new block's index.
    ///
    /// Any failure leaves the document untouched and raises a
    /// `StructuralGenerationFailed` notification.
    pub async fn generate_table<G: GenerationService>(
        &self,
        state: &mut EditorState,
        generator: &G,
        after_index: usize,
    ) -> Result<usize, BlockError> {
        let doc = state.document();
        let blocks = decompose(doc);
        let anchor = Self::block_at(&blocks, after_index)?;
        let heading = blocks[..=after_index]
            .iter()
            .rev()
            .find(|b| matches!(b.kind, BlockKind::Heading(_)))
            .map(Block::text);
        let context = SuggestionContext {
            full_text: doc.text(),
            text_before_caret: doc.get_text(Range::new(0, anchor.range.end()))?,
            heading,
            paragraph: anchor.text(),
            ..SuggestionContext::default()
        };
        let mut request = GenerationRequest::new(GenerationKind::Table, context);
        request.language = self.language.clone();
        request.tone = self.tone.clone();

        let outcome = match generator.generate_block(request).await {
            Ok(text) => parse_pipe_table(&text).ok_or(BlockError::MalformedTable),
            Err(e) => Err(BlockError::Service(e)),
        };
        let table = match outcome {
            Ok(table) => table,
            Err(e) => {
                warn!(target: "blocks.sync", after_index, error = %e, "table_generation_failed");
                state.events().notify(Notification::new(
                    NotificationKind::StructuralGenerationFailed,
                    format!("could not generate a table: {e}"),
                ));
                return Err(e);
            }
        };
        let id = new_block_id();
        let rows = table.rows.len();
        self.insert_new(state, after_index, NewBlock::Table(table), &id)?;
        info!(target: "blocks.sync", after_index, rows, block_id = %id, "table_generated");
        Ok(after_index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ListKind;
    use core_document::Document;
    use pretty_assertions::assert_eq;

    fn state(text: &str) -> EditorState {
        let (sink, _rx) = core_events::channel();
        EditorState::new(Document::from_text(text), sink)
    }

    fn texts(state: &EditorState) -> Vec<String> {
        decompose(state.document()).iter().map(Block::text).collect()
    }

    #[test]
    fn block_ids_are_silent_and_unique() {
        let mut st = state("a\nb\nc\n");
        let sync = BlockSynchronizer::default();
        assert_eq!(sync.ensure_block_ids(&mut st).unwrap(), 3);
        assert!(!st.history().can_undo());
        let ids: HashSet<Option<String>> = decompose(st.document()).into_iter().map(|b| b.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&None));
        assert_eq!(sync.ensure_block_ids(&mut st).unwrap(), 0);
    }

    #[test]
    fn insert_heading_and_list() {
        let mut st = state("a\nb\n");
        let sync = BlockSynchronizer::default();
        sync.insert_block(&mut st, 0, BlockKind::Heading(2)).unwrap();
        sync.insert_block(&mut st, 2, BlockKind::List(ListKind::Bullet)).unwrap();
        let kinds: Vec<BlockKind> = decompose(st.document()).iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Paragraph,
                BlockKind::Heading(2),
                BlockKind::Paragraph,
                BlockKind::List(ListKind::Bullet),
            ]
        );
        assert!(matches!(
            sync.insert_block(&mut st, 9, BlockKind::Paragraph),
            Err(BlockError::OutOfBounds { index: 9, len: 4 })
        ));
        assert!(matches!(
            sync.insert_block(&mut st, 0, BlockKind::Embed),
            Err(BlockError::Unsupported(BlockKind::Embed))
        ));
    }

    #[test]
    fn delete_middle_last_and_only_block() {
        let mut st = state("one\ntwo\nthree\n");
        let sync = BlockSynchronizer::default();
        st.format_line(4, 0, attr::HEADER, 1i64.into(), ChangeSource::User)
            .unwrap();
        let removed = sync.delete_block(&mut st, 2).unwrap();
        assert_eq!(removed.text(), "three");
        assert_eq!(st.document().text(), "one\ntwo\n");
        // "two" keeps its heading format.
        assert_eq!(
            decompose(st.document())[1].kind,
            BlockKind::Heading(1)
        );

        sync.delete_block(&mut st, 0).unwrap();
        assert_eq!(texts(&st), vec!["two"]);
        sync.delete_block(&mut st, 0).unwrap();
        assert_eq!(st.document(), &Document::new());
    }

    #[test]
    fn move_block_reorders_as_one_step() {
        let mut st = state("a\nb\nc\n");
        let sync = BlockSynchronizer::default();
        sync.ensure_block_ids(&mut st).unwrap();
        let ids: Vec<Option<String>> = decompose(st.document()).into_iter().map(|b| b.id).collect();

        sync.move_block(&mut st, 2, 0).unwrap();
        assert_eq!(texts(&st), vec!["c", "a", "b"]);
        sync.move_block(&mut st, 0, 2).unwrap();
        assert_eq!(texts(&st), vec!["a", "b", "c"]);
        sync.move_block(&mut st, 0, 1).unwrap();
        assert_eq!(texts(&st), vec!["b", "a", "c"]);
        let moved: Vec<Option<String>> = decompose(st.document()).into_iter().map(|b| b.id).collect();
        assert_eq!(moved, vec![ids[1].clone(), ids[0].clone(), ids[2].clone()]);

        st.undo().unwrap();
        assert_eq!(texts(&st), vec!["a", "b", "c"]);
    }
}
