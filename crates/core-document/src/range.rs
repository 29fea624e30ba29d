use crate::error::DocumentError;
use serde::{Deserialize, Serialize};

/// `{index, length}` into the flattened document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub index: usize,
    pub length: usize,
}

impl Range {
    pub fn new(index: usize, length: usize) -> Self {
        Self { index, length }
    }

    /// Collapsed range (a caret).
    pub fn caret(index: usize) -> Self {
        Self { index, length: 0 }
    }

    pub fn end(&self) -> usize {
        self.index + self.length
    }

    pub fn is_collapsed(&self) -> bool {
        self.length == 0
    }

    /// Strict interior test: `index < pos < end`.
    pub fn strictly_contains(&self, pos: usize) -> bool {
        self.index < pos && pos < self.end()
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        self.index <= other.index && other.end() <= self.end()
    }

    pub fn intersects(&self, other: &Range) -> bool {
        self.index < other.end() && other.index < self.end()
    }

    pub fn check(&self, doc_len: usize) -> Result<(), DocumentError> {
        match self.index.checked_add(self.length) {
            Some(end) if end <= doc_len => Ok(()),
            _ => Err(DocumentError::OutOfRange {
                index: self.index,
                length: self.length,
                doc_len,
            }),
        }
    }
}
