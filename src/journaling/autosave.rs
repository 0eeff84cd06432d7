use std::sync::Arc;

use indexmap::IndexMap;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::config::AutoSaveConfig;
use crate::journaling::backup::LocalBackupStore;
use crate::journaling::status::SaveStatus;
use crate::remote::RemoteError;
use crate::session::document::DocumentId;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveTicket(u64);

impl SaveTicket {
    #[cfg(test)]
    pub(crate) fn for_tests(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Debounced,
    Manual,
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub ticket: SaveTicket,
    pub document_id: DocumentId,
    pub content: String,
    pub trigger: SaveTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Written,
    Failed(StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSaveEvent {
    Saved {
        document_id: DocumentId,
        timestamp: OffsetDateTime,
        /// The document was closed while the save was in flight.
        evicted: bool,
    },
    Error {
        document_id: DocumentId,
        message: String,
        backup: BackupOutcome,
        evicted: bool,
    },
}

impl AutoSaveEvent {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            AutoSaveEvent::Saved { document_id, .. } | AutoSaveEvent::Error { document_id, .. } => {
                document_id
            }
        }
    }

    pub fn is_evicted(&self) -> bool {
        match self {
            AutoSaveEvent::Saved { evicted, .. } | AutoSaveEvent::Error { evicted, .. } => *evicted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualSave {
    Started(SaveRequest),
    Coalesced,
    Unknown,
}

#[derive(Debug)]
struct InFlight {
    ticket: SaveTicket,
    content: String,
}

#[derive(Debug)]
struct Tracked {
    buffer: String,
    status: SaveStatus,
    deadline: Option<OffsetDateTime>,
    dirty: bool,
    dirty_again: bool,
    in_flight: Option<InFlight>,
    evicted: bool,
}

impl Tracked {
    fn new(buffer: String, last_saved_at: Option<OffsetDateTime>) -> Self {
        Self {
            buffer,
            status: SaveStatus::initial(last_saved_at),
            deadline: None,
            dirty: false,
            dirty_again: false,
            in_flight: None,
            evicted: false,
        }
    }
}

#[derive(Debug)]
pub struct AutoSaveEngine {
    enabled: bool,
    debounce: Duration,
    backups: LocalBackupStore,
    clock: Arc<dyn Clock>,
    docs: IndexMap<DocumentId, Tracked>,
    next_ticket: u64,
}

impl AutoSaveEngine {
    pub fn new(config: &AutoSaveConfig, backups: LocalBackupStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            debounce: config.debounce_duration(),
            backups,
            clock,
            docs: IndexMap::new(),
            next_ticket: 1,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn backups(&self) -> &LocalBackupStore {
        &self.backups
    }

    /// Starts tracking `id` with the content just loaded into the editor.
    ///
    /// A document that still has a save in flight or unsaved edits keeps its
    /// state; anything else starts over from `last_saved_at`.
    pub fn attach(&mut self, id: &DocumentId, content: &str, last_saved_at: Option<OffsetDateTime>) {
        if let Some(tracked) = self.docs.get_mut(id) {
            if tracked.in_flight.is_some() || tracked.dirty {
                tracked.evicted = false;
                return;
            }
        }
        self.docs
            .insert(id.clone(), Tracked::new(content.to_string(), last_saved_at));
    }

    pub fn notify_content_changed(&mut self, id: &DocumentId, content: impl Into<String>) {
        let content = content.into();
        let now = self.clock.now();
        let enabled = self.enabled;
        let debounce = self.debounce;
        let tracked = self.docs.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(document_id = %id, "tracking document on first edit");
            Tracked::new(String::new(), None)
        });
        tracked.evicted = false;
        if tracked.buffer == content {
            return;
        }
        tracked.buffer = content;
        tracked.dirty = true;
        if enabled {
            tracked.deadline = Some(now + debounce);
        }
    }

    pub fn poll_due(&mut self) -> Vec<SaveRequest> {
        let now = self.clock.now();
        let due: Vec<DocumentId> = self
            .docs
            .iter()
            .filter(|(_, tracked)| tracked.deadline.map_or(false, |deadline| deadline <= now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut requests = Vec::new();
        for id in due {
            let Some(tracked) = self.docs.get_mut(&id) else {
                continue;
            };
            tracked.deadline = None;
            if tracked.status.is_saving() {
                tracing::debug!(document_id = %id, "save in flight, coalescing debounced save");
                tracked.dirty_again = true;
                continue;
            }
            if !tracked.dirty {
                continue;
            }
            if let Some(request) = self.start_save(&id, SaveTrigger::Debounced) {
                requests.push(request);
            }
        }
        requests
    }

    /// Explicit save: skips the debounce window but never runs concurrently
    /// with another save of the same document.
    pub fn save_now(&mut self, id: &DocumentId) -> ManualSave {
        let Some(tracked) = self.docs.get_mut(id) else {
            return ManualSave::Unknown;
        };
        tracked.deadline = None;
        if tracked.status.is_saving() {
            tracked.dirty_again = true;
            return ManualSave::Coalesced;
        }
        match self.start_save(id, SaveTrigger::Manual) {
            Some(request) => ManualSave::Started(request),
            None => ManualSave::Coalesced,
        }
    }

    pub fn flush_all(&mut self) -> Vec<SaveRequest> {
        let dirty: Vec<DocumentId> = self
            .docs
            .iter()
            .filter(|(_, tracked)| tracked.dirty || tracked.dirty_again)
            .map(|(id, _)| id.clone())
            .collect();
        let mut requests = Vec::new();
        for id in dirty {
            let Some(tracked) = self.docs.get_mut(&id) else {
                continue;
            };
            tracked.deadline = None;
            if tracked.status.is_saving() {
                tracked.dirty_again = true;
                continue;
            }
            if let Some(request) = self.start_save(&id, SaveTrigger::Flush) {
                requests.push(request);
            }
        }
        requests
    }

    fn start_save(&mut self, id: &DocumentId, trigger: SaveTrigger) -> Option<SaveRequest> {
        let ticket = SaveTicket(self.next_ticket);
        let tracked = self.docs.get_mut(id)?;
        if let Err(err) = tracked.status.begin_save() {
            tracing::debug!(document_id = %id, %err, "save not started");
            tracked.dirty_again = true;
            return None;
        }
        self.next_ticket += 1;
        tracked.dirty_again = false;
        tracked.in_flight = Some(InFlight {
            ticket,
            content: tracked.buffer.clone(),
        });
        tracing::debug!(document_id = %id, ?trigger, bytes = tracked.buffer.len(), "starting save");
        Some(SaveRequest {
            ticket,
            document_id: id.clone(),
            content: tracked.buffer.clone(),
            trigger,
        })
    }

    /// Applies the outcome of a remote save. Unknown tickets are ignored.
    pub fn complete(
        &mut self,
        ticket: SaveTicket,
        outcome: Result<(), RemoteError>,
    ) -> Option<AutoSaveEvent> {
        let Some(index) = self.docs.values().position(|tracked| {
            tracked
                .in_flight
                .as_ref()
                .map_or(false, |flight| flight.ticket == ticket)
        }) else {
            tracing::warn!(?ticket, "completion for unknown save ticket");
            return None;
        };
        let now = self.clock.now();
        let debounce = self.debounce;
        let (id, tracked) = self.docs.get_index_mut(index)?;
        let id = id.clone();
        let flight = tracked.in_flight.take()?;

        let event = match outcome {
            Ok(()) => {
                if let Err(err) = tracked.status.mark_saved(now) {
                    tracing::error!(document_id = %id, %err, "inconsistent save status");
                }
                tracked.dirty = tracked.buffer != flight.content;
                if let Err(err) = self.backups.remove(&id) {
                    tracing::warn!(document_id = %id, %err, "failed to clear local backup");
                }
                tracing::info!(document_id = %id, "saved");
                AutoSaveEvent::Saved {
                    document_id: id.clone(),
                    timestamp: now,
                    evicted: tracked.evicted,
                }
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(err) = tracked.status.mark_failed(message.clone()) {
                    tracing::error!(document_id = %id, %err, "inconsistent save status");
                }
                let backup = match self.backups.record_failure(&id, &tracked.buffer, &message) {
                    Ok(_) => BackupOutcome::Written,
                    Err(storage_err) => {
                        tracing::error!(
                            document_id = %id,
                            %storage_err,
                            "save failed and local backup could not be written"
                        );
                        tracked.status.set_backup_error(Some(storage_err.to_string()));
                        BackupOutcome::Failed(storage_err)
                    }
                };
                tracing::warn!(document_id = %id, %message, transient = err.is_transient(), "save failed");
                AutoSaveEvent::Error {
                    document_id: id.clone(),
                    message,
                    backup,
                    evicted: tracked.evicted,
                }
            }
        };

        if tracked.dirty_again {
            tracked.dirty_again = false;
            tracked.deadline = Some(now + debounce);
        }
        if tracked.evicted {
            self.docs.shift_remove(&id);
        }
        Some(event)
    }

    /// Stops tracking `id`. A pending debounce is dropped without side
    /// effects; a save already in flight still completes.
    pub fn detach(&mut self, id: &DocumentId) {
        let Some(tracked) = self.docs.get_mut(id) else {
            return;
        };
        if tracked.deadline.take().is_some() || tracked.dirty_again {
            tracing::debug!(document_id = %id, "cancelled pending auto-save");
        }
        tracked.dirty_again = false;
        if tracked.in_flight.is_some() {
            tracked.evicted = true;
        } else {
            self.docs.shift_remove(id);
        }
    }

    pub fn restore(&mut self, id: &DocumentId, content: impl Into<String>) {
        let now = self.clock.now();
        let tracked = self
            .docs
            .entry(id.clone())
            .or_insert_with(|| Tracked::new(String::new(), None));
        tracked.buffer = content.into();
        tracked.dirty = true;
        tracked.evicted = false;
        tracked.deadline = Some(now);
    }

    pub fn status(&self, id: &DocumentId) -> Option<&SaveStatus> {
        self.docs.get(id).map(|tracked| &tracked.status)
    }

    pub fn buffer(&self, id: &DocumentId) -> Option<&str> {
        self.docs.get(id).map(|tracked| tracked.buffer.as_str())
    }

    pub fn is_tracking(&self, id: &DocumentId) -> bool {
        self.docs.contains_key(id)
    }

    pub fn is_dirty(&self, id: &DocumentId) -> bool {
        self.docs
            .get(id)
            .map_or(false, |tracked| tracked.dirty || tracked.dirty_again)
    }

    pub fn is_in_flight(&self, id: &DocumentId) -> bool {
        self.docs
            .get(id)
            .map_or(false, |tracked| tracked.in_flight.is_some())
    }

    pub fn has_pending_timer(&self, id: &DocumentId) -> bool {
        self.docs
            .get(id)
            .map_or(false, |tracked| tracked.deadline.is_some())
    }

    pub fn in_flight_count(&self) -> usize {
        self.docs
            .values()
            .filter(|tracked| tracked.in_flight.is_some())
            .count()
    }

    pub fn next_deadline(&self) -> Option<OffsetDateTime> {
        self.docs.values().filter_map(|tracked| tracked.deadline).min()
    }

    pub fn pending_documents(&self) -> Vec<DocumentId> {
        self.docs
            .iter()
            .filter(|(_, tracked)| {
                tracked.dirty || tracked.dirty_again || tracked.in_flight.is_some()
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn has_unsaved_work(&self) -> bool {
        self.docs.values().any(|tracked| {
            tracked.dirty || tracked.dirty_again || tracked.in_flight.is_some()
        })
    }
}
