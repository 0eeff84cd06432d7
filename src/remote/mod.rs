use crate::session::document::{DocumentId, DocumentMetadata};

mod dispatch;
mod library;
#[cfg(test)]
pub(crate) mod memory;

pub use dispatch::{InlineDispatch, SaveDispatch, SaveJob, SaveResult, ThreadedDispatch};
pub use library::LibraryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("temporary failure: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Permanent(String),
    #[error("chapter {0} does not exist")]
    NotFound(DocumentId),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Source of truth for chapter content and the book outline.
///
/// `save_content` must be idempotent: repeating a save with the same content
/// is harmless.
pub trait RemoteStore: Send + Sync {
    fn load_content(&self, id: &DocumentId) -> Result<String, RemoteError>;
    fn save_content(&self, id: &DocumentId, content: &str) -> Result<(), RemoteError>;
    fn list_outline(&self, book_id: &str) -> Result<Vec<DocumentMetadata>, RemoteError>;
}
