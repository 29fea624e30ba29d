//! Commands and the editor facade.
//!
//! `Editor` is the single entry point a UI (or the CLI) drives: it owns the
//! editor state and the event receiver, routes user input through the
//! suggestion engine and citation guards, dispatches `Command`s and runs
//! deferred side effects when events are drained.

pub mod command;
pub mod editor;

pub use command::{Command, ParseCommandError};
pub use editor::{DrainReport, Editor};

use core_blocks::BlockError;
use core_cite::CiteError;
use core_document::DocumentError;
use core_state::EditError;
use core_suggest::SuggestError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("no selection")]
    NoSelection,
    #[error("command needs a non-empty selection")]
    EmptySelection,
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Suggest(#[from] SuggestError),
    #[error(transparent)]
    Cite(#[from] CiteError),
    #[error(transparent)]
    Block(#[from] BlockError),
}
