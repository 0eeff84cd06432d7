use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crossbeam_channel::{Receiver, TryRecvError};
use time::{Duration, OffsetDateTime};

use crate::remote::{RemoteError, RemoteStore};
use crate::session::document::{DocumentId, DocumentMetadata};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineChange {
    pub documents: Vec<DocumentMetadata>,
    pub added: Vec<DocumentId>,
    pub removed: Vec<DocumentId>,
    pub reordered: bool,
}

impl OutlineChange {
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.iter().any(|doc| &doc.id == id)
    }
}

type OutlineListener = Box<dyn FnMut(&OutlineChange) + Send>;

pub struct OutlineSync {
    book_id: String,
    fingerprint: Option<u64>,
    known: Vec<DocumentId>,
    listeners: Vec<OutlineListener>,
    poll_interval: Option<Duration>,
    next_poll_at: Option<OffsetDateTime>,
    feed: Option<Receiver<Vec<DocumentMetadata>>>,
}

impl std::fmt::Debug for OutlineSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlineSync")
            .field("book_id", &self.book_id)
            .field("fingerprint", &self.fingerprint)
            .field("known", &self.known.len())
            .field("listeners", &self.listeners.len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl OutlineSync {
    pub fn new(book_id: impl Into<String>, poll_interval: Option<Duration>) -> Self {
        Self {
            book_id: book_id.into(),
            fingerprint: None,
            known: Vec::new(),
            listeners: Vec::new(),
            poll_interval,
            next_poll_at: None,
            feed: None,
        }
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn known_ids(&self) -> &[DocumentId] {
        &self.known
    }

    pub fn on_outline_changed<F>(&mut self, callback: F)
    where
        F: FnMut(&OutlineChange) + Send + 'static,
    {
        self.listeners.push(Box::new(callback));
    }

    pub fn attach_feed(&mut self, feed: Receiver<Vec<DocumentMetadata>>) {
        self.feed = Some(feed);
    }

    pub fn ingest(&mut self, documents: Vec<DocumentMetadata>) -> Option<OutlineChange> {
        let fingerprint = fingerprint(&documents);
        if self.fingerprint == Some(fingerprint) {
            return None;
        }

        let previous: HashSet<&DocumentId> = self.known.iter().collect();
        let current: HashSet<&DocumentId> = documents.iter().map(|doc| &doc.id).collect();
        let added: Vec<DocumentId> = documents
            .iter()
            .filter(|doc| !previous.contains(&doc.id))
            .map(|doc| doc.id.clone())
            .collect();
        let removed: Vec<DocumentId> = self
            .known
            .iter()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();
        let surviving_before: Vec<&DocumentId> =
            self.known.iter().filter(|id| current.contains(id)).collect();
        let surviving_after: Vec<&DocumentId> = documents
            .iter()
            .map(|doc| &doc.id)
            .filter(|id| previous.contains(id))
            .collect();
        let reordered = surviving_before != surviving_after;

        self.known = documents.iter().map(|doc| doc.id.clone()).collect();
        self.fingerprint = Some(fingerprint);

        let change = OutlineChange {
            documents,
            added,
            removed,
            reordered,
        };
        tracing::debug!(
            book_id = %self.book_id,
            added = change.added.len(),
            removed = change.removed.len(),
            reordered = change.reordered,
            "outline changed"
        );
        for listener in self.listeners.iter_mut() {
            (*listener)(&change);
        }
        Some(change)
    }

    pub fn drain_feed(&mut self) -> Option<OutlineChange> {
        let feed = self.feed.as_ref()?;
        let mut latest = None;
        let mut closed = false;
        loop {
            match feed.try_recv() {
                Ok(documents) => latest = Some(documents),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }
        if closed {
            tracing::debug!(book_id = %self.book_id, "outline feed closed");
            self.feed = None;
        }
        latest.and_then(|documents| self.ingest(documents))
    }

    /// Pull path: fetches the outline when the polling interval has elapsed.
    pub fn poll(
        &mut self,
        remote: &dyn RemoteStore,
        now: OffsetDateTime,
    ) -> Result<Option<OutlineChange>, RemoteError> {
        let Some(interval) = self.poll_interval else {
            return Ok(None);
        };
        if let Some(next) = self.next_poll_at {
            if now < next {
                return Ok(None);
            }
        }
        self.next_poll_at = Some(now + interval);
        self.refresh(remote)
    }

    pub fn refresh(&mut self, remote: &dyn RemoteStore) -> Result<Option<OutlineChange>, RemoteError> {
        let documents = remote.list_outline(&self.book_id)?;
        Ok(self.ingest(documents))
    }
}

fn fingerprint(documents: &[DocumentMetadata]) -> u64 {
    let mut hasher = DefaultHasher::new();
    documents.len().hash(&mut hasher);
    for doc in documents {
        doc.hash(&mut hasher);
    }
    hasher.finish()
}
