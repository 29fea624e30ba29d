//! Citation subsystem: atomic in-text citation spans kept in step with the
//! bibliography store.
//!
//! Spans are found by scanning document attributes (`citation-id` and
//! friends); nothing here consults rendered output. Insertion, deletion and
//! restyling each land as one undo step. Restyling runs in the editor's
//! `Reformatting` phase so its change events are suppressed for the
//! suggestion trigger and autosave.

pub mod manager;
pub mod span;
pub mod style;

pub use manager::{Citation, CitationManager, ReconcileSummary, TRAIL};
pub use span::{CitationSpan, TrailRun, ordered_ids, span_containing, span_ending_at, spans, trails};
pub use style::{CitationStyle, author_date_form, numeric_form};

use core_document::DocumentError;
use core_services::ServiceError;
use core_state::EditError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Stable citation identifier (UUID v4), unchanged by restyling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationId(String);

impl CitationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CitationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CitationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CitationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for CitationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CiteError {
    #[error("citation not found: {0}")]
    NotFound(String),
    #[error("position {index} is inside citation {id}")]
    InsideCitation { id: String, index: usize },
    #[error("unknown citation style: {0}")]
    UnknownStyle(String),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<DocumentError> for CiteError {
    fn from(e: DocumentError) -> Self {
        CiteError::Edit(e.into())
    }
}
