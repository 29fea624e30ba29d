//! Attribute maps carried by delta operations.
//!
//! Keys are plain strings (the persisted and wire shape stays Quill-compatible)
//! while the editor code refers to them through the constants in [`attr`].
//! A value of [`AttrValue::Null`] inside a retain means "remove this key"; it
//! never survives into a document once composed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known attribute keys.
pub mod attr {
    /// Heading level (1..=3) on a line terminator.
    pub const HEADER: &str = "header";
    /// `"bullet"` or `"ordered"` on a line terminator.
    pub const LIST: &str = "list";
    /// Stable block identifier on a line terminator.
    pub const BLOCK_ID: &str = "block-id";
    pub const BOLD: &str = "bold";
    pub const ITALIC: &str = "italic";
    pub const UNDERLINE: &str = "underline";
    pub const LINK: &str = "link";
    pub const COLOR: &str = "color";
    pub const CITATION_ID: &str = "citation-id";
    /// Source marker: bibliography entry backing the citation.
    pub const CITATION_SOURCE: &str = "citation-source";
    /// Style marker: citation style the in-text form was rendered with.
    pub const CITATION_STYLE: &str = "citation-style";
    /// Auto-inserted punctuation following a citation span; value is the citation id.
    pub const CITATION_TRAIL: &str = "citation-trail";

    /// Keys that describe a whole line and therefore live on its `\n`.
    pub const BLOCK_KEYS: [&str; 3] = [HEADER, LIST, BLOCK_ID];

    pub fn is_block_key(key: &str) -> bool {
        BLOCK_KEYS.contains(&key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u8> for AttrValue {
    fn from(v: u8) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => f.write_str("null"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(AttrValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(AttrValue::as_int)
    }

    pub fn is_set(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(v) if !v.is_null() && *v != AttrValue::Bool(false))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Split into (inline, block) attribute maps.
    pub fn split_block(&self) -> (Attributes, Attributes) {
        let mut inline = Attributes::new();
        let mut block = Attributes::new();
        for (k, v) in &self.0 {
            if attr::is_block_key(k) {
                block.0.insert(k.clone(), v.clone());
            } else {
                inline.0.insert(k.clone(), v.clone());
            }
        }
        (inline, block)
    }

    /// Keys whose values agree in both maps.
    pub fn intersect(&self, other: &Attributes) -> Attributes {
        Attributes(
            self.0
                .iter()
                .filter(|(k, v)| other.0.get(*k) == Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Overlay `b` on `a`. Nulls in `b` delete keys unless `keep_null` (retain
    /// composed onto retain must keep them to still remove keys later).
    pub fn compose(a: &Attributes, b: &Attributes, keep_null: bool) -> Attributes {
        let mut out = b.0.clone();
        if !keep_null {
            out.retain(|_, v| !v.is_null());
        }
        for (k, v) in &a.0 {
            if !b.0.contains_key(k) {
                out.insert(k.clone(), v.clone());
            }
        }
        Attributes(out)
    }

    /// Attributes turning `a` into `b`.
    pub fn diff(a: &Attributes, b: &Attributes) -> Attributes {
        let mut out = BTreeMap::new();
        for key in a.0.keys().chain(b.0.keys()) {
            let left = a.0.get(key);
            let right = b.0.get(key);
            if left != right {
                out.insert(key.clone(), right.cloned().unwrap_or(AttrValue::Null));
            }
        }
        Attributes(out)
    }

    /// Attributes undoing `attr` when it was applied over `base`.
    pub fn invert(attr: &Attributes, base: &Attributes) -> Attributes {
        let mut out = BTreeMap::new();
        for (k, v) in &base.0 {
            if let Some(applied) = attr.0.get(k)
                && applied != v
            {
                out.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &attr.0 {
            if !base.0.contains_key(k) && !v.is_null() {
                out.insert(k.clone(), AttrValue::Null);
            }
        }
        Attributes(out)
    }

    /// Transform `b` against concurrent `a`. With priority `a` wins conflicts.
    pub fn transform(a: &Attributes, b: &Attributes, priority: bool) -> Attributes {
        if !priority {
            return b.clone();
        }
        Attributes(
            b.0.iter()
                .filter(|(k, _)| !a.0.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, AttrValue)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Attributes(iter.into_iter().collect())
    }
}
