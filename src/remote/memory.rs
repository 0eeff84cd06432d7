use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use time::macros::datetime;
use time::OffsetDateTime;

use super::{RemoteError, RemoteStore};
use crate::session::document::{ChapterStatus, DocumentId, DocumentMetadata};

#[derive(Debug, Clone)]
struct Chapter {
    title: String,
    content: String,
    status: ChapterStatus,
    last_modified: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Inner {
    chapters: IndexMap<DocumentId, Chapter>,
    fail_next: HashMap<DocumentId, RemoteError>,
    fail_all: Option<RemoteError>,
    delays: HashMap<DocumentId, Duration>,
    save_calls: usize,
}

/// In-process remote with scriptable failures.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn with_documents<'a>(docs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let remote = Self::default();
        for (id, content) in docs {
            remote.insert(id, &id.to_uppercase(), content);
        }
        remote
    }

    pub fn insert(&self, id: &str, title: &str, content: &str) {
        self.inner.lock().chapters.insert(
            DocumentId::from(id),
            Chapter {
                title: title.to_string(),
                content: content.to_string(),
                status: ChapterStatus::Draft,
                last_modified: datetime!(2024-06-01 00:00 UTC),
            },
        );
    }

    pub fn remove(&self, id: &DocumentId) {
        self.inner.lock().chapters.shift_remove(id);
    }

    pub fn rename(&self, id: &DocumentId, title: &str) {
        if let Some(chapter) = self.inner.lock().chapters.get_mut(id) {
            chapter.title = title.to_string();
        }
    }

    pub fn content(&self, id: &DocumentId) -> Option<String> {
        self.inner
            .lock()
            .chapters
            .get(id)
            .map(|chapter| chapter.content.clone())
    }

    pub fn fail_next(&self, id: &DocumentId, err: RemoteError) {
        self.inner.lock().fail_next.insert(id.clone(), err);
    }

    pub fn fail_all(&self, err: Option<RemoteError>) {
        self.inner.lock().fail_all = err;
    }

    /// Every later save of `id` sleeps this long before answering.
    pub fn delay(&self, id: &DocumentId, by: Duration) {
        self.inner.lock().delays.insert(id.clone(), by);
    }

    pub fn save_calls(&self) -> usize {
        self.inner.lock().save_calls
    }
}

impl RemoteStore for MemoryRemote {
    fn load_content(&self, id: &DocumentId) -> Result<String, RemoteError> {
        self.content(id)
            .ok_or_else(|| RemoteError::NotFound(id.clone()))
    }

    fn save_content(&self, id: &DocumentId, content: &str) -> Result<(), RemoteError> {
        let delay = self.inner.lock().delays.get(id).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let mut inner = self.inner.lock();
        inner.save_calls += 1;
        if let Some(err) = inner.fail_next.remove(id) {
            return Err(err);
        }
        if let Some(err) = &inner.fail_all {
            return Err(err.clone());
        }
        let chapter = inner
            .chapters
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.clone()))?;
        chapter.content = content.to_string();
        Ok(())
    }

    fn list_outline(&self, _book_id: &str) -> Result<Vec<DocumentMetadata>, RemoteError> {
        let inner = self.inner.lock();
        Ok(inner
            .chapters
            .iter()
            .map(|(id, chapter)| {
                let word_count = chapter.content.split_whitespace().count() as u32;
                DocumentMetadata {
                    id: id.clone(),
                    title: chapter.title.clone(),
                    status: chapter.status,
                    word_count,
                    estimated_reading_time: crate::session::document::estimate_reading_minutes(
                        word_count,
                    ),
                    last_modified: chapter.last_modified,
                }
            })
            .collect())
    }
}
