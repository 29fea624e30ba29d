//! The document: an insert-only delta that always ends with a line break.
//!
//! Block formats (`header`, `list`, `block-id`) sit on the `\n` terminating a
//! line, so any sequence of inserts renders to a flat list of well formed
//! blocks. Every mutator validates first and only then composes; a rejected
//! change leaves the document untouched.
//!
//! Each mutator has a `*_delta` twin that only builds the change. Callers that
//! own history and change notification (`core-state`) build with those and
//! route the result through [`Document::apply_delta`].

use crate::attributes::{AttrValue, Attributes};
use crate::delta::{Content, Delta, Embed, Op};
use crate::error::DocumentError;
use crate::range::Range;
use tracing::trace;

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub delta: Delta,
    pub inverse: Delta,
    pub old_len: usize,
    pub new_len: usize,
}

/// One rendered line: inline ops plus the attributes of its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Document index of the first character.
    pub index: usize,
    /// Length excluding the terminating `\n`.
    pub length: usize,
    pub ops: Vec<Op>,
    pub attributes: Attributes,
}

impl Line {
    /// Index of the terminating `\n`.
    pub fn newline_index(&self) -> usize {
        self.index + self.length
    }

    /// Range covering the line including its terminator.
    pub fn range(&self) -> Range {
        Range::new(self.index, self.length + 1)
    }

    pub fn text(&self) -> String {
        self.ops.iter().filter_map(Op::insert_text).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    contents: Delta,
    len: usize,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn ends_with_newline(delta: &Delta) -> bool {
    matches!(
        delta.ops.last(),
        Some(Op::Insert { insert: Content::Text(t), .. }) if t.ends_with('\n')
    )
}

impl Document {
    pub fn new() -> Self {
        Self {
            contents: Delta::new().insert("\n"),
            len: 1,
        }
    }

    /// Plain-text document; a trailing line break is added when missing.
    pub fn from_text(text: &str) -> Self {
        let mut contents = Delta::new().insert(text);
        if !text.ends_with('\n') {
            contents = contents.insert("\n");
        }
        let len = contents.length();
        Self { contents, len }
    }

    pub fn from_delta(delta: Delta) -> Result<Self, DocumentError> {
        if !delta.is_document() {
            return Err(DocumentError::NotADocument);
        }
        let mut contents = delta;
        if !ends_with_newline(&contents) {
            contents = contents.insert("\n");
        }
        let len = contents.length();
        Ok(Self { contents, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// A document always holds at least its trailing line break.
    pub fn is_empty(&self) -> bool {
        self.len <= 1
    }

    pub fn contents(&self) -> &Delta {
        &self.contents
    }

    pub fn text(&self) -> String {
        self.contents.text()
    }

    /// Compose `change` onto the document, rejecting it whole when it does not fit.
    pub fn apply_delta(&mut self, change: &Delta) -> Result<DocumentChange, DocumentError> {
        let required = change.base_length();
        if required > self.len {
            return Err(DocumentError::DeltaTooLong {
                required,
                doc_len: self.len,
            });
        }
        let next = self.contents.compose(change);
        if !ends_with_newline(&next) {
            return Err(DocumentError::TrailingNewline);
        }
        let inverse = change.invert(&self.contents);
        let old_len = self.len;
        let new_len = next.length();
        self.contents = next;
        self.len = new_len;
        trace!(target: "document", old_len, new_len, ops = change.ops.len(), "apply_delta");
        Ok(DocumentChange {
            delta: change.clone(),
            inverse,
            old_len,
            new_len,
        })
    }

    pub fn get_text(&self, range: Range) -> Result<String, DocumentError> {
        range.check(self.len)?;
        Ok(self.contents.slice(range.index, range.end()).text())
    }

    /// Formatted contents of `range` as an insert-only delta.
    pub fn contents_in(&self, range: Range) -> Result<Delta, DocumentError> {
        range.check(self.len)?;
        Ok(self.contents.slice(range.index, range.end()))
    }

    /// Attributes shared by the whole range: inline formats common to every
    /// character plus line formats common to every touched line. A caret
    /// reports the formats of the character before it.
    pub fn get_format(&self, range: Range) -> Result<Attributes, DocumentError> {
        range.check(self.len)?;
        let inline_ops = if range.is_collapsed() {
            if range.index == 0 {
                Vec::new()
            } else {
                self.contents.slice(range.index - 1, range.index).ops
            }
        } else {
            self.contents.slice(range.index, range.end()).ops
        };
        let mut inline: Option<Attributes> = None;
        for op in &inline_ops {
            let is_break = matches!(
                op,
                Op::Insert { insert: Content::Text(t), .. } if t.chars().all(|c| c == '\n')
            );
            if is_break {
                continue;
            }
            let attrs = op.attributes().cloned().unwrap_or_default();
            let (attrs, _) = attrs.split_block();
            inline = Some(match inline {
                None => attrs,
                Some(acc) => acc.intersect(&attrs),
            });
        }
        let mut block: Option<Attributes> = None;
        for line in self.lines_touching(range.index, range.length) {
            let (_, attrs) = line.attributes.split_block();
            block = Some(match block {
                None => attrs,
                Some(acc) => acc.intersect(&attrs),
            });
        }
        let mut out = inline.unwrap_or_default();
        for (k, v) in block.unwrap_or_default().iter() {
            out.set(k, v.clone());
        }
        Ok(out)
    }

    pub fn insert_text_delta(
        &self,
        index: usize,
        text: &str,
        attrs: &Attributes,
    ) -> Result<Delta, DocumentError> {
        Range::caret(index).check(self.len)?;
        let (inline, block) = attrs.split_block();
        let mut delta = Delta::new().retain(index);
        for (i, piece) in text.split('\n').enumerate() {
            if i > 0 {
                delta = delta.insert_with("\n", block.clone());
            }
            delta = delta.insert_with(piece, inline.clone());
        }
        Ok(delta)
    }

    pub fn insert_embed_delta(
        &self,
        index: usize,
        embed: Embed,
        attrs: &Attributes,
    ) -> Result<Delta, DocumentError> {
        Range::caret(index).check(self.len)?;
        Ok(Delta::new().retain(index).insert_embed(embed, attrs.clone()))
    }

    pub fn delete_text_delta(&self, index: usize, length: usize) -> Result<Delta, DocumentError> {
        Range::new(index, length).check(self.len)?;
        Ok(Delta::new().retain(index).delete(length))
    }

    /// Inline attributes go to every non-break character in the range; block
    /// attributes in `attrs` go to the line breaks inside it.
    pub fn format_text_delta(
        &self,
        index: usize,
        length: usize,
        attrs: &Attributes,
    ) -> Result<Delta, DocumentError> {
        let range = Range::new(index, length);
        let text = self.get_text(range)?;
        let (inline, block) = attrs.split_block();
        let mut delta = Delta::new().retain(index);
        let mut run = 0usize;
        for ch in text.chars() {
            if ch == '\n' {
                delta = delta.retain_with(run, inline.clone());
                delta = delta.retain_with(1, block.clone());
                run = 0;
            } else {
                run += 1;
            }
        }
        delta = delta.retain_with(run, inline);
        Ok(delta.chop())
    }

    /// Set (or with `AttrValue::Null` clear) a line format on every line the
    /// range touches. A caret touches the line it sits on.
    pub fn format_line_delta(
        &self,
        index: usize,
        length: usize,
        name: &str,
        value: AttrValue,
    ) -> Result<Delta, DocumentError> {
        Range::new(index, length).check(self.len)?;
        let attrs = Attributes::new().with(name, value);
        let mut delta = Delta::new();
        let mut cursor = 0;
        for line in self.lines_touching(index, length) {
            let nl = line.newline_index();
            delta = delta.retain(nl - cursor).retain_with(1, attrs.clone());
            cursor = nl + 1;
        }
        Ok(delta.chop())
    }

    pub fn insert_text(
        &mut self,
        index: usize,
        text: &str,
        attrs: &Attributes,
    ) -> Result<DocumentChange, DocumentError> {
        let delta = self.insert_text_delta(index, text, attrs)?;
        self.apply_delta(&delta)
    }

    pub fn insert_embed(
        &mut self,
        index: usize,
        embed: Embed,
        attrs: &Attributes,
    ) -> Result<DocumentChange, DocumentError> {
        let delta = self.insert_embed_delta(index, embed, attrs)?;
        self.apply_delta(&delta)
    }

    pub fn delete_text(
        &mut self,
        index: usize,
        length: usize,
    ) -> Result<DocumentChange, DocumentError> {
        let delta = self.delete_text_delta(index, length)?;
        self.apply_delta(&delta)
    }

    pub fn format_text(
        &mut self,
        index: usize,
        length: usize,
        attrs: &Attributes,
    ) -> Result<DocumentChange, DocumentError> {
        let delta = self.format_text_delta(index, length, attrs)?;
        self.apply_delta(&delta)
    }

    pub fn format_line(
        &mut self,
        index: usize,
        length: usize,
        name: &str,
        value: AttrValue,
    ) -> Result<DocumentChange, DocumentError> {
        let delta = self.format_line_delta(index, length, name, value)?;
        self.apply_delta(&delta)
    }

    pub fn lines(&self) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut current: Vec<Op> = Vec::new();
        let mut start = 0usize;
        let mut pos = 0usize;
        for op in &self.contents.ops {
            let Op::Insert { insert, attributes } = op else {
                continue;
            };
            match insert {
                Content::Embed(_) => {
                    current.push(op.clone());
                    pos += 1;
                }
                Content::Text(text) => {
                    let mut pieces = text.split('\n').peekable();
                    while let Some(piece) = pieces.next() {
                        if !piece.is_empty() {
                            current.push(Op::text(piece, attributes.clone()));
                            pos += piece.chars().count();
                        }
                        if pieces.peek().is_some() {
                            lines.push(Line {
                                index: start,
                                length: pos - start,
                                ops: std::mem::take(&mut current),
                                attributes: attributes.clone(),
                            });
                            pos += 1;
                            start = pos;
                        }
                    }
                }
            }
        }
        lines
    }

    /// The line owning `index` (a line owns its terminator).
    pub fn line_at(&self, index: usize) -> Option<Line> {
        self.lines()
            .into_iter()
            .find(|line| index <= line.newline_index())
    }

    fn lines_touching(&self, index: usize, length: usize) -> Vec<Line> {
        let end = index + length.max(1);
        self.lines()
            .into_iter()
            .filter(|line| index <= line.newline_index() && line.index < end)
            .collect()
    }
}
