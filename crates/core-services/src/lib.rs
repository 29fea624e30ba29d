//! External collaborator contracts and in-memory implementations.
//!
//! Every collaborator is a trait injected into the components that use it;
//! nothing here is a process-wide singleton. Async methods return
//! `impl Future + Send` so implementations can be awaited from tokio tasks.
//! Callers hold concrete types (generics), wrapping them in `Arc` when the
//! same instance must be shared with a spawned task; the traits are
//! implemented for `Arc<T>` for that purpose.
//!
//! The in-memory implementations back the tests and the CLI. They record
//! calls and support one-shot failure injection.

pub mod bibliography;
pub mod credits;
pub mod error;
pub mod generation;
pub mod persistence;

pub use bibliography::{BibliographyEntry, BibliographyStore, CitationRecord, InMemoryBibliography};
pub use credits::{InMemoryCredits, WordCredits};
pub use error::ServiceError;
pub use generation::{
    DONE_SENTINEL, GenerationKind, GenerationRequest, GenerationService, ScriptedGenerator,
    SuggestionContext, TokenStream,
};
pub use persistence::{PersistenceService, RecordingPersistence};

use std::sync::{Mutex, MutexGuard, PoisonError};

// A panic while holding one of these locks cannot leave the recorded data
// half-written, so poisoning is ignored.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
