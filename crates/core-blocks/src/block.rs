//! Top-level blocks derived from document lines.

use core_document::{Content, Delta, Document, Embed, Op, Range, attr};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Bullet,
    Ordered,
}

impl ListKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ListKind::Bullet => "bullet",
            ListKind::Ordered => "ordered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bullet" => Some(ListKind::Bullet),
            "ordered" => Some(ListKind::Ordered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Level 1..=3.
    Heading(u8),
    Paragraph,
    List(ListKind),
    Table,
    /// A line holding only a non-table embed.
    Embed,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Heading(n) => write!(f, "heading-{n}"),
            BlockKind::Paragraph => f.write_str("paragraph"),
            BlockKind::List(k) => write!(f, "list-{}", k.as_str()),
            BlockKind::Table => f.write_str("table"),
            BlockKind::Embed => f.write_str("embed"),
        }
    }
}

/// A view over a run of lines. Owns copies only; the document stays the
/// source of truth and blocks are rebuilt after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// `block-id` of the first line, if assigned.
    pub id: Option<String>,
    pub kind: BlockKind,
    /// Covers every line of the block including the last terminator.
    pub range: Range,
    pub lines: usize,
    pub content: Delta,
}

impl Block {
    /// Plain text without the final line break.
    pub fn text(&self) -> String {
        let text = self.content.text();
        text.strip_suffix('\n').unwrap_or(&text).to_string()
    }
}

fn classify(ops: &[Op], attributes: &core_document::Attributes) -> BlockKind {
    if let Some(level) = attributes.get_int(attr::HEADER) {
        return BlockKind::Heading(level.clamp(1, 3) as u8);
    }
    if let Some(kind) = attributes.get_str(attr::LIST).and_then(ListKind::parse) {
        return BlockKind::List(kind);
    }
    match ops {
        [Op::Insert { insert: Content::Embed(Embed::Table(_)), .. }] => BlockKind::Table,
        [Op::Insert { insert: Content::Embed(_), .. }] => BlockKind::Embed,
        _ => BlockKind::Paragraph,
    }
}

/// Split `doc` into blocks. Consecutive list lines of one kind form a single
/// list block.
pub fn decompose(doc: &Document) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for line in doc.lines() {
        let kind = classify(&line.ops, &line.attributes);
        let range = line.range();
        if let (BlockKind::List(_), Some(last)) = (kind, blocks.last_mut())
            && last.kind == kind
            && last.range.end() == range.index
        {
            last.range.length += range.length;
            last.lines += 1;
            continue;
        }
        blocks.push(Block {
            id: line.attributes.get_str(attr::BLOCK_ID).map(str::to_string),
            kind,
            range,
            lines: 1,
            content: Delta::new(),
        });
    }
    for block in &mut blocks {
        block.content = doc
            .contents()
            .slice(block.range.index, block.range.end());
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_document::{Attributes, TableData};
    use pretty_assertions::assert_eq;

    #[test]
    fn groups_list_lines_of_one_kind() {
        let bullet = Attributes::new().with(attr::LIST, "bullet");
        let ordered = Attributes::new().with(attr::LIST, "ordered");
        let doc = Document::from_delta(
            Delta::new()
                .insert("Title")
                .insert_with("\n", Attributes::new().with(attr::HEADER, 2i64))
                .insert("a")
                .insert_with("\n", bullet.clone())
                .insert("b")
                .insert_with("\n", bullet)
                .insert("c")
                .insert_with("\n", ordered)
                .insert_embed(Embed::Table(TableData::blank(1, 1)), Attributes::new())
                .insert("\nend\n"),
        )
        .unwrap();
        let kinds: Vec<BlockKind> = decompose(&doc).iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Heading(2),
                BlockKind::List(ListKind::Bullet),
                BlockKind::List(ListKind::Ordered),
                BlockKind::Table,
                BlockKind::Paragraph,
            ]
        );
        let blocks = decompose(&doc);
        assert_eq!(blocks[1].range, Range::new(6, 4));
        assert_eq!(blocks[1].lines, 2);
        assert_eq!(blocks[1].text(), "a\nb");
        assert_eq!(blocks[4].text(), "end");
    }

    #[test]
    fn empty_document_is_one_paragraph() {
        let blocks = decompose(&Document::new());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(blocks[0].range, Range::new(0, 1));
        assert!(blocks[0].id.is_none());
    }
}
