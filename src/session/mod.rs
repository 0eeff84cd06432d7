pub mod document;
pub mod outline;
pub mod persist;
pub mod tabs;

pub use document::{ChapterStatus, Document, DocumentId, DocumentMetadata};
pub use outline::{OutlineChange, OutlineSync};
pub use persist::{PersistedTabs, TabSessionStore};
pub use tabs::{TabError, TabSession};
