//! Retain / insert / delete deltas.
//!
//! A `Delta` is both the representation of a document (inserts only) and of a
//! change to one. Composition, inversion and transformation follow the usual
//! rich-text OT rules so history entries can be merged and rebased without
//! snapshotting the whole document.
//!
//! Lengths count Unicode scalar values; an embed has length 1.

use crate::attributes::Attributes;
use serde::{Deserialize, Serialize};

/// Placeholder used when an embed is flattened to plain text.
pub const EMBED_CHAR: char = '\u{FFFC}';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
    /// Empty grid of the given shape.
    pub fn blank(rows: usize, cols: usize) -> Self {
        Self {
            rows: vec![vec![String::new(); cols]; rows],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Embed {
    Image(String),
    Table(TableData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Embed(Embed),
}

impl Content {
    pub fn len(&self) -> usize {
        match self {
            Content::Text(t) => t.chars().count(),
            Content::Embed(_) => 1,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Op {
    Insert {
        insert: Content,
        #[serde(default, skip_serializing_if = "Attributes::is_empty")]
        attributes: Attributes,
    },
    Retain {
        retain: usize,
        #[serde(default, skip_serializing_if = "Attributes::is_empty")]
        attributes: Attributes,
    },
    Delete {
        delete: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Retain,
    Delete,
}

impl Op {
    pub fn text(text: impl Into<String>, attributes: Attributes) -> Self {
        Op::Insert {
            insert: Content::Text(text.into()),
            attributes,
        }
    }

    pub fn embed(embed: Embed, attributes: Attributes) -> Self {
        Op::Insert {
            insert: Content::Embed(embed),
            attributes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Op::Insert { insert, .. } => insert.len(),
            Op::Retain { retain, .. } => *retain,
            Op::Delete { delete } => *delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Insert { .. } => OpKind::Insert,
            Op::Retain { .. } => OpKind::Retain,
            Op::Delete { .. } => OpKind::Delete,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Op::Insert { attributes, .. } | Op::Retain { attributes, .. } => Some(attributes),
            Op::Delete { .. } => None,
        }
    }

    /// Inserted text, with embeds flattened to [`EMBED_CHAR`].
    pub fn insert_text(&self) -> Option<String> {
        match self {
            Op::Insert {
                insert: Content::Text(t),
                ..
            } => Some(t.clone()),
            Op::Insert {
                insert: Content::Embed(_),
                ..
            } => Some(EMBED_CHAR.to_string()),
            _ => None,
        }
    }
}

fn char_substr(s: &str, offset: usize, length: usize) -> String {
    s.chars().skip(offset).take(length).collect()
}

/// Cursor over a slice of ops that can hand out partial ops.
pub struct OpIterator<'a> {
    ops: &'a [Op],
    index: usize,
    offset: usize,
}

impl<'a> OpIterator<'a> {
    pub fn new(ops: &'a [Op]) -> Self {
        Self {
            ops,
            index: 0,
            offset: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.peek_length() < usize::MAX
    }

    pub fn peek(&self) -> Option<&'a Op> {
        self.ops.get(self.index)
    }

    /// Kind of the next op; an exhausted iterator behaves as an endless retain.
    pub fn peek_kind(&self) -> OpKind {
        self.peek().map(Op::kind).unwrap_or(OpKind::Retain)
    }

    pub fn peek_length(&self) -> usize {
        match self.ops.get(self.index) {
            Some(op) => op.len() - self.offset,
            None => usize::MAX,
        }
    }

    /// Take at most `length` from the next op.
    pub fn next_len(&mut self, length: usize) -> Op {
        let Some(op) = self.ops.get(self.index) else {
            return Op::Retain {
                retain: usize::MAX,
                attributes: Attributes::new(),
            };
        };
        let offset = self.offset;
        let remaining = op.len() - offset;
        let length = if length >= remaining {
            self.index += 1;
            self.offset = 0;
            remaining
        } else {
            self.offset += length;
            length
        };
        match op {
            Op::Delete { .. } => Op::Delete { delete: length },
            Op::Retain { attributes, .. } => Op::Retain {
                retain: length,
                attributes: attributes.clone(),
            },
            Op::Insert {
                insert: Content::Text(t),
                attributes,
            } => Op::Insert {
                insert: Content::Text(char_substr(t, offset, length)),
                attributes: attributes.clone(),
            },
            Op::Insert {
                insert: Content::Embed(e),
                attributes,
            } => Op::Insert {
                insert: Content::Embed(e.clone()),
                attributes: attributes.clone(),
            },
        }
    }

    pub fn next_op(&mut self) -> Op {
        self.next_len(usize::MAX)
    }

    /// Remaining ops, the first possibly partial.
    pub fn rest(&self) -> Vec<Op> {
        if !self.has_next() {
            return Vec::new();
        }
        if self.offset == 0 {
            return self.ops[self.index..].to_vec();
        }
        let mut clone = OpIterator {
            ops: self.ops,
            index: self.index,
            offset: self.offset,
        };
        let first = clone.next_op();
        let mut out = vec![first];
        out.extend_from_slice(&self.ops[clone.index..]);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub ops: Vec<Op>,
}

impl From<Vec<Op>> for Delta {
    fn from(ops: Vec<Op>) -> Self {
        let mut delta = Delta::new();
        for op in ops {
            delta.push(op);
        }
        delta
    }
}

impl Delta {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn insert(mut self, text: &str) -> Self {
        self.push(Op::text(text, Attributes::new()));
        self
    }

    pub fn insert_with(mut self, text: &str, attributes: Attributes) -> Self {
        self.push(Op::text(text, attributes));
        self
    }

    pub fn insert_embed(mut self, embed: Embed, attributes: Attributes) -> Self {
        self.push(Op::embed(embed, attributes));
        self
    }

    pub fn retain(mut self, length: usize) -> Self {
        self.push(Op::Retain {
            retain: length,
            attributes: Attributes::new(),
        });
        self
    }

    pub fn retain_with(mut self, length: usize, attributes: Attributes) -> Self {
        self.push(Op::Retain {
            retain: length,
            attributes,
        });
        self
    }

    pub fn delete(mut self, length: usize) -> Self {
        self.push(Op::Delete { delete: length });
        self
    }

    /// Append an op, merging with the previous one where possible. Inserts are
    /// kept ahead of an adjacent delete so equivalent deltas stay canonical.
    pub fn push(&mut self, op: Op) -> &mut Self {
        if op.is_empty() {
            return self;
        }
        let mut index = self.ops.len();
        if let (Some(Op::Delete { delete: last }), Op::Delete { delete }) = (self.ops.last_mut(), &op)
        {
            *last = last.saturating_add(*delete);
            return self;
        }
        if matches!(self.ops.last(), Some(Op::Delete { .. })) && matches!(op, Op::Insert { .. }) {
            index -= 1;
            if index == 0 {
                self.ops.insert(0, op);
                return self;
            }
        }
        if index > 0 {
            match (&mut self.ops[index - 1], &op) {
                (
                    Op::Insert {
                        insert: Content::Text(prev),
                        attributes: prev_attrs,
                    },
                    Op::Insert {
                        insert: Content::Text(next),
                        attributes,
                    },
                ) if prev_attrs == attributes => {
                    prev.push_str(next);
                    return self;
                }
                (
                    Op::Retain {
                        retain: prev,
                        attributes: prev_attrs,
                    },
                    Op::Retain { retain, attributes },
                ) if prev_attrs == attributes => {
                    *prev = prev.saturating_add(*retain);
                    return self;
                }
                _ => {}
            }
        }
        if index == self.ops.len() {
            self.ops.push(op);
        } else {
            self.ops.insert(index, op);
        }
        self
    }

    /// Drop a trailing attribute-less retain.
    pub fn chop(mut self) -> Self {
        if let Some(Op::Retain { attributes, .. }) = self.ops.last()
            && attributes.is_empty()
        {
            self.ops.pop();
        }
        self
    }

    pub fn length(&self) -> usize {
        self.ops.iter().map(Op::len).fold(0, usize::saturating_add)
    }

    /// Net change in document length when applied.
    pub fn change_length(&self) -> isize {
        self.ops
            .iter()
            .map(|op| match op {
                Op::Insert { insert, .. } => insert.len() as isize,
                Op::Delete { delete } => -(*delete as isize),
                Op::Retain { .. } => 0,
            })
            .sum()
    }

    /// Length of the document this delta expects to be applied to.
    pub fn base_length(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                Op::Retain { retain, .. } => *retain,
                Op::Delete { delete } => *delete,
                Op::Insert { .. } => 0,
            })
            .fold(0, usize::saturating_add)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when applying the delta changes nothing.
    pub fn is_noop(&self) -> bool {
        self.ops
            .iter()
            .all(|op| matches!(op, Op::Retain { attributes, .. } if attributes.is_empty()))
    }

    /// True when the delta only holds inserts (i.e. describes a document).
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Op::Insert { .. }))
    }

    pub fn has_deletes(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, Op::Delete { .. }))
    }

    /// Flattened inserted text.
    pub fn text(&self) -> String {
        self.ops.iter().filter_map(Op::insert_text).collect()
    }

    pub fn slice(&self, start: usize, end: usize) -> Delta {
        let mut out = Delta::new();
        let mut iter = OpIterator::new(&self.ops);
        let mut index = 0;
        while index < end && iter.has_next() {
            let next = if index < start {
                iter.next_len(start - index)
            } else {
                let op = iter.next_len(end - index);
                out.push(op.clone());
                op
            };
            index += next.len();
        }
        out
    }

    pub fn concat(mut self, other: Delta) -> Delta {
        let mut ops = other.ops.into_iter();
        if let Some(first) = ops.next() {
            self.push(first);
            self.ops.extend(ops);
        }
        self
    }

    /// Delta equivalent to applying `self` then `other`.
    pub fn compose(&self, other: &Delta) -> Delta {
        let mut this_iter = OpIterator::new(&self.ops);
        let mut other_iter = OpIterator::new(&other.ops);
        let mut delta = Delta::new();

        // Fast path: a leading plain retain in `other` passes our inserts through.
        if let Some(Op::Retain {
            retain,
            attributes,
        }) = other_iter.peek()
            && attributes.is_empty()
        {
            let mut first_left = *retain;
            while this_iter.peek_kind() == OpKind::Insert && this_iter.peek_length() <= first_left {
                first_left -= this_iter.peek_length();
                delta.push(this_iter.next_op());
            }
            if *retain - first_left > 0 {
                other_iter.next_len(*retain - first_left);
            }
        }

        while this_iter.has_next() || other_iter.has_next() {
            if other_iter.peek_kind() == OpKind::Insert {
                delta.push(other_iter.next_op());
            } else if this_iter.peek_kind() == OpKind::Delete {
                delta.push(this_iter.next_op());
            } else {
                let length = this_iter.peek_length().min(other_iter.peek_length());
                let this_op = this_iter.next_len(length);
                let other_op = other_iter.next_len(length);
                match other_op {
                    Op::Retain {
                        attributes: other_attrs,
                        ..
                    } => {
                        let new_op = match this_op {
                            Op::Retain { attributes, .. } => Op::Retain {
                                retain: length,
                                attributes: Attributes::compose(&attributes, &other_attrs, true),
                            },
                            Op::Insert { insert, attributes } => Op::Insert {
                                insert,
                                attributes: Attributes::compose(&attributes, &other_attrs, false),
                            },
                            Op::Delete { .. } => unreachable!("deletes are consumed above"),
                        };
                        delta.push(new_op.clone());
                        if !other_iter.has_next() && delta.ops.last() == Some(&new_op) {
                            let rest = Delta::from(this_iter.rest());
                            return delta.concat(rest).chop();
                        }
                    }
                    Op::Delete { .. } => {
                        if matches!(this_op, Op::Retain { .. }) {
                            delta.push(other_op);
                        }
                        // insert followed by delete cancels out
                    }
                    Op::Insert { .. } => unreachable!("inserts are consumed above"),
                }
            }
        }
        delta.chop()
    }

    /// Delta undoing `self` when it was applied to `base`.
    pub fn invert(&self, base: &Delta) -> Delta {
        let mut inverted = Delta::new();
        let mut base_index = 0;
        for op in &self.ops {
            match op {
                Op::Insert { insert, .. } => {
                    inverted.push(Op::Delete {
                        delete: insert.len(),
                    });
                }
                Op::Retain { retain, attributes } if attributes.is_empty() => {
                    inverted.push(Op::Retain {
                        retain: *retain,
                        attributes: Attributes::new(),
                    });
                    base_index += retain;
                }
                Op::Retain { retain, attributes } => {
                    for base_op in base.slice(base_index, base_index + retain).ops {
                        let base_attrs = base_op.attributes().cloned().unwrap_or_default();
                        inverted.push(Op::Retain {
                            retain: base_op.len(),
                            attributes: Attributes::invert(attributes, &base_attrs),
                        });
                    }
                    base_index += retain;
                }
                Op::Delete { delete } => {
                    for base_op in base.slice(base_index, base_index + delete).ops {
                        inverted.push(base_op);
                    }
                    base_index += delete;
                }
            }
        }
        inverted.chop()
    }

    /// Rebase `other` so it applies after `self`. With `priority`, `self` is
    /// considered to have happened first for concurrent inserts.
    pub fn transform(&self, other: &Delta, priority: bool) -> Delta {
        let mut this_iter = OpIterator::new(&self.ops);
        let mut other_iter = OpIterator::new(&other.ops);
        let mut delta = Delta::new();
        while this_iter.has_next() || other_iter.has_next() {
            if this_iter.peek_kind() == OpKind::Insert
                && (priority || other_iter.peek_kind() != OpKind::Insert)
            {
                let len = this_iter.next_op().len();
                delta.push(Op::Retain {
                    retain: len,
                    attributes: Attributes::new(),
                });
            } else if other_iter.peek_kind() == OpKind::Insert {
                delta.push(other_iter.next_op());
            } else {
                let length = this_iter.peek_length().min(other_iter.peek_length());
                let this_op = this_iter.next_len(length);
                let other_op = other_iter.next_len(length);
                match (this_op, other_op) {
                    (Op::Delete { .. }, _) => continue,
                    (_, Op::Delete { delete }) => {
                        delta.push(Op::Delete { delete });
                    }
                    (this_op, other_op) => {
                        let empty = Attributes::new();
                        let a = this_op.attributes().unwrap_or(&empty);
                        let b = other_op.attributes().unwrap_or(&empty);
                        delta.push(Op::Retain {
                            retain: length,
                            attributes: Attributes::transform(a, b, priority),
                        });
                    }
                }
            }
        }
        delta.chop()
    }

    /// Where `index` ends up after `self` is applied.
    pub fn transform_position(&self, mut index: usize, priority: bool) -> usize {
        let mut iter = OpIterator::new(&self.ops);
        let mut offset = 0;
        while iter.has_next() && offset <= index {
            let length = iter.peek_length();
            let kind = iter.peek_kind();
            iter.next_op();
            match kind {
                OpKind::Delete => {
                    index -= length.min(index - offset);
                    continue;
                }
                OpKind::Insert if offset < index || !priority => {
                    index += length;
                }
                _ => {}
            }
            offset += length;
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttrValue, attr};
    use pretty_assertions::assert_eq;

    fn bold() -> Attributes {
        Attributes::new().with(attr::BOLD, true)
    }

    #[test]
    fn push_merges_adjacent_compatible_ops() {
        let d = Delta::new().insert("ab").insert("c").retain(2).retain(3).delete(1).delete(2);
        assert_eq!(
            d.ops,
            vec![
                Op::text("abc", Attributes::new()),
                Op::Retain {
                    retain: 5,
                    attributes: Attributes::new()
                },
                Op::Delete { delete: 3 },
            ]
        );
    }

    #[test]
    fn push_orders_insert_before_delete() {
        let d = Delta::new().retain(1).delete(2).insert("x");
        assert_eq!(d, Delta::new().retain(1).insert("x").delete(2));
        let leading = Delta::new().delete(1).insert("y");
        assert_eq!(leading.ops[0], Op::text("y", Attributes::new()));
    }

    #[test]
    fn compose_insert_then_retain_format() {
        let a = Delta::new().insert("Hello");
        let b = Delta::new().retain_with(5, bold());
        assert_eq!(a.compose(&b), Delta::new().insert_with("Hello", bold()));
    }

    #[test]
    fn compose_insert_then_delete_cancels() {
        let a = Delta::new().retain(3).insert("xyz");
        let b = Delta::new().retain(3).delete(3);
        assert!(a.compose(&b).is_noop());
    }

    #[test]
    fn compose_onto_document() {
        let doc = Delta::new().insert("Hello\n");
        let change = Delta::new().retain(5).insert(" World");
        assert_eq!(doc.compose(&change).text(), "Hello World\n");
    }

    #[test]
    fn compose_removes_attribute_with_null() {
        let doc = Delta::new().insert_with("ab", bold());
        let change = Delta::new().retain_with(1, Attributes::new().with(attr::BOLD, AttrValue::Null));
        assert_eq!(
            doc.compose(&change),
            Delta::new().insert("a").insert_with("b", bold())
        );
    }

    #[test]
    fn invert_of_delete_restores_attributes() {
        let base = Delta::new().insert("ab").insert_with("cd", bold()).insert("\n");
        let change = Delta::new().retain(1).delete(2);
        let inverse = change.invert(&base);
        assert_eq!(
            inverse,
            Delta::new().retain(1).insert("b").insert_with("c", bold())
        );
        let after = base.compose(&change);
        assert_eq!(after.compose(&inverse), base);
    }

    #[test]
    fn invert_of_format() {
        let base = Delta::new().insert_with("ab", bold()).insert("\n");
        let change = Delta::new().retain_with(2, Attributes::new().with(attr::BOLD, AttrValue::Null));
        let after = base.compose(&change);
        assert_eq!(after.compose(&change.invert(&base)), base);
    }

    #[test]
    fn transform_concurrent_inserts() {
        let a = Delta::new().insert("A");
        let b = Delta::new().insert("B");
        assert_eq!(a.transform(&b, true), Delta::new().retain(1).insert("B"));
        assert_eq!(a.transform(&b, false), Delta::new().insert("B"));
    }

    #[test]
    fn transform_against_delete() {
        let a = Delta::new().retain(1).delete(2);
        let b = Delta::new().retain(4).insert("x");
        assert_eq!(a.transform(&b, true), Delta::new().retain(2).insert("x"));
    }

    #[test]
    fn transform_position_moves_with_edits() {
        let ins = Delta::new().retain(2).insert("abc");
        assert_eq!(ins.transform_position(1, false), 1);
        assert_eq!(ins.transform_position(2, false), 5);
        assert_eq!(ins.transform_position(2, true), 2);
        assert_eq!(ins.transform_position(4, false), 7);
        let del = Delta::new().retain(2).delete(3);
        assert_eq!(del.transform_position(3, false), 2);
        assert_eq!(del.transform_position(8, false), 5);
    }

    #[test]
    fn slice_splits_ops() {
        let d = Delta::new().insert("Hello").insert_with("World", bold());
        assert_eq!(d.slice(3, 7), Delta::new().insert("lo").insert_with("Wo", bold()));
    }

    #[test]
    fn embeds_have_length_one() {
        let d = Delta::new()
            .insert("a")
            .insert_embed(Embed::Image("x.png".into()), Attributes::new())
            .insert("b");
        assert_eq!(d.length(), 3);
        assert_eq!(d.text(), format!("a{EMBED_CHAR}b"));
    }

    #[test]
    fn serde_matches_wire_shape() {
        let d = Delta::new()
            .retain(2)
            .insert_with("x", bold())
            .delete(1)
            .insert_embed(Embed::Table(TableData::blank(1, 1)), Attributes::new());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["ops"][0]["retain"], 2);
        assert_eq!(json["ops"][1]["attributes"]["bold"], true);
        let back: Delta = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }
}
