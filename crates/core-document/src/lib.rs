//! Block-structured rich-text document model.
//!
//! The document is a sequence of insert operations (text or embeds) carrying
//! attribute maps. All mutations are deltas of retain / insert / delete ops so
//! they compose and invert cleanly; the history manager and the suggestion
//! overlay are both built on that algebra.
//!
//! Positions and lengths count Unicode scalar values. An embed counts as one.
//!
//! Validation scope: bounds and structural validity only. Whether a citation
//! id sits on a well formed span is checked by `core-cite`, not here.

pub mod attributes;
pub mod delta;
pub mod document;
pub mod error;
pub mod range;

pub use attributes::{AttrValue, Attributes, attr};
pub use delta::{Content, Delta, EMBED_CHAR, Embed, Op, OpIterator, OpKind, TableData};
pub use document::{Document, DocumentChange, Line};
pub use error::DocumentError;
pub use range::Range;
