use thiserror::Error;

/// Rejections raised at the document API boundary. A rejected mutation leaves
/// the document untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("range {index}+{length} exceeds document length {doc_len}")]
    OutOfRange {
        index: usize,
        length: usize,
        doc_len: usize,
    },
    #[error("delta spans {required} characters but the document has {doc_len}")]
    DeltaTooLong { required: usize, doc_len: usize },
    #[error("delta contains retain or delete operations and cannot describe a document")]
    NotADocument,
    #[error("the trailing line break of a document cannot be removed")]
    TrailingNewline,
}
