use thiserror::Error;

/// Failures reported by external collaborators. These are converted to
/// notifications at component boundaries and never reach the document
/// mutation path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected by service: {0}")]
    Rejected(String),
    #[error("insufficient word credits: {requested} requested, {available} available")]
    InsufficientCredits { requested: u64, available: u64 },
}

impl ServiceError {
    /// Worth retrying later; the caller keeps its last good state.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Network(_))
    }
}
