//! Block synchronizer: a top-level block view over the document for
//! structural edits, the markup codec used for persistence and the debounced
//! autosave worker.
//!
//! Blocks are always re-derived from the document; structural commands are
//! the only path from blocks back into it.

pub mod autosave;
pub mod block;
pub mod markup;
pub mod sync;
pub mod table;

pub use autosave::{AutosaveHandle, AutosaveStats, spawn_autosave};
pub use block::{Block, BlockKind, ListKind, decompose};
pub use markup::{MarkupError, parse, serialize};
pub use sync::{BlockSynchronizer, DEFAULT_TABLE_COLS, DEFAULT_TABLE_ROWS};
pub use table::parse_pipe_table;

use core_document::DocumentError;
use core_services::ServiceError;
use core_state::EditError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("block {index} out of bounds ({len} blocks)")]
    OutOfBounds { index: usize, len: usize },
    #[error("cannot create an empty {0} block")]
    Unsupported(BlockKind),
    #[error("generated text is not a table")]
    MalformedTable,
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Markup(#[from] MarkupError),
}

impl From<DocumentError> for BlockError {
    fn from(e: DocumentError) -> Self {
        BlockError::Edit(e.into())
    }
}
