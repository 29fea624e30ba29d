//! Suggestion engine: streams generated continuations into the document as a
//! pending range and resolves them.
//!
//! State machine: `Idle -> Requesting -> Streaming -> AwaitingDecision -> Idle`.
//! At most one suggestion is live; a trigger while one is live is ignored.
//!
//! Streamed tokens are `Api` changes carrying the pending colour, so the whole
//! batch merges into one history entry opened by a cutoff. Accepting clears
//! the colour inside the same entry; declining deletes the text, which makes
//! the entry a no-op that history drops. Either way the user's own edits are
//! never merged with generated text.
//!
//! The engine borrows the [`EditorState`](core_state::EditorState) and the
//! collaborators per call; it owns only the suggestion bookkeeping, the open
//! token stream and its abort listener.

pub mod context;
pub mod engine;
pub mod trigger;

pub use context::{build_context, ends_sentence, word_count};
pub use engine::{
    StreamStep, StructuralKind, SuggestError, Suggestion, SuggestionAbort, SuggestionEngine,
    SuggestionMode, SuggestionPhase,
};
pub use trigger::TriggerPolicy;
