use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use indexmap::IndexMap;

use crate::app::editor::EditorBuffer;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::journaling::{
    AutoSaveEngine, AutoSaveEvent, BackupOutcome, LocalBackupStore, ManualSave,
    RecoveryCoordinator, RecoveryOffer, SaveRequest, SaveState, SaveStatus,
};
use crate::remote::{RemoteStore, SaveDispatch, SaveResult};
use crate::session::{
    Document, DocumentId, DocumentMetadata, OutlineChange, OutlineSync, TabError, TabSession,
    TabSessionStore,
};
use crate::storage::KeyValueStore;

pub struct WorkspaceDeps {
    pub clock: Arc<dyn Clock>,
    pub client_store: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub dispatch: Box<dyn SaveDispatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabBadge {
    Clean,
    Unsaved,
    Saving,
    Failed,
    BackupFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub saved: usize,
    /// Documents whose latest content never reached the remote store.
    pub unsaved: Vec<DocumentId>,
}

/// The editing session of one book: open tabs, the active editor, and the
/// save pipeline behind them. Everything here runs on one thread; remote
/// saves complete through [`SaveDispatch`] and are applied in [`Self::tick`].
pub struct Workspace {
    book_id: String,
    clock: Arc<dyn Clock>,
    remote: Arc<dyn RemoteStore>,
    dispatch: Box<dyn SaveDispatch>,
    engine: AutoSaveEngine,
    recovery: RecoveryCoordinator,
    outline: OutlineSync,
    tabs: TabSession,
    tab_store: Option<TabSessionStore>,
    documents: IndexMap<DocumentId, Document>,
    editor: Option<EditorBuffer>,
    recovery_offer: Option<RecoveryOffer>,
    status_message: Option<String>,
}

impl Workspace {
    /// Builds the workspace and restores the persisted tab session. No remote
    /// call is made yet: restored tabs show as loading placeholders until
    /// [`Self::start`] resolves them against the outline.
    pub fn new(config: &AppConfig, deps: WorkspaceDeps) -> Self {
        let WorkspaceDeps {
            clock,
            client_store,
            remote,
            dispatch,
        } = deps;
        let book_id = config.book.id.clone();

        let backups = LocalBackupStore::new(
            client_store.clone(),
            clock.clone(),
            config.auto_save.backup_ttl(),
        );
        backups.sweep();
        let engine = AutoSaveEngine::new(&config.auto_save, backups.clone(), clock.clone());
        let recovery = RecoveryCoordinator::new(backups, clock.clone());

        let tab_store = config
            .session
            .persist_tabs
            .then(|| TabSessionStore::new(client_store, &book_id));
        let tabs = tab_store
            .as_ref()
            .and_then(TabSessionStore::load)
            .unwrap_or_default();
        let documents = tabs
            .tab_order()
            .iter()
            .map(|id| (id.clone(), Document::placeholder(id.clone())))
            .collect();
        tracing::debug!(book_id = %book_id, restored_tabs = tabs.len(), "workspace created");

        Self {
            outline: OutlineSync::new(book_id.clone(), config.session.outline_poll_interval()),
            book_id,
            clock,
            remote,
            dispatch,
            engine,
            recovery,
            tabs,
            tab_store,
            documents,
            editor: None,
            recovery_offer: None,
            status_message: None,
        }
    }

    pub fn start(&mut self) {
        match self.outline.refresh(self.remote.as_ref()) {
            Ok(Some(change)) => self.apply_outline_change(change),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%err, book_id = %self.book_id, "could not load outline");
                self.status_message = Some(format!("Could not load the outline: {err}"));
            }
        }
        if self.editor.is_none() {
            self.activate_current();
        }
    }

    // ----- view state -----

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn tabs(&self) -> &TabSession {
        &self.tabs
    }

    pub fn tab_order(&self) -> &[DocumentId] {
        self.tabs.tab_order()
    }

    pub fn active_document_id(&self) -> Option<&DocumentId> {
        self.tabs.active()
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn open_documents(&self) -> Vec<&Document> {
        self.tabs
            .tab_order()
            .iter()
            .filter_map(|id| self.documents.get(id))
            .collect()
    }

    pub fn unopened_documents(&self) -> Vec<&Document> {
        self.outline
            .known_ids()
            .iter()
            .filter(|id| !self.tabs.contains(id))
            .filter_map(|id| self.documents.get(id))
            .collect()
    }

    pub fn editor(&self) -> Option<&EditorBuffer> {
        self.editor.as_ref()
    }

    pub fn save_status(&self) -> Option<&SaveStatus> {
        let id = self.tabs.active()?;
        self.engine.status(id)
    }

    pub fn save_status_of(&self, id: &DocumentId) -> Option<&SaveStatus> {
        self.engine.status(id)
    }

    pub fn recovery_offer(&self) -> Option<&RecoveryOffer> {
        self.recovery_offer.as_ref()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }

    pub fn now(&self) -> time::OffsetDateTime {
        self.clock.now()
    }

    pub fn has_unsaved_work(&self) -> bool {
        self.engine.has_unsaved_work()
    }

    pub fn outline_mut(&mut self) -> &mut OutlineSync {
        &mut self.outline
    }

    pub fn tab_badge(&self, id: &DocumentId) -> TabBadge {
        let unsaved = self
            .documents
            .get(id)
            .map_or(false, |doc| doc.has_unsaved_changes);
        match self.engine.status(id) {
            Some(status) if status.is_saving() => TabBadge::Saving,
            Some(status) if status.state() == SaveState::Error => {
                if status.backup_error().is_some() {
                    TabBadge::BackupFailed
                } else {
                    TabBadge::Failed
                }
            }
            _ if unsaved => TabBadge::Unsaved,
            _ => TabBadge::Clean,
        }
    }

    // ----- editing -----

    pub fn edit<F>(&mut self, apply: F) -> bool
    where
        F: FnOnce(&mut EditorBuffer) -> bool,
    {
        let Some(editor) = self.editor.as_mut() else {
            return false;
        };
        if !apply(editor) {
            return false;
        }
        // cursor moves also land here; the engine ignores unchanged text
        let id = editor.document_id().clone();
        let content = editor.text().to_string();
        self.content_changed(&id, content);
        true
    }

    /// Entry point for renderers that own their own buffer: `content` is the
    /// full current text of `id`.
    pub fn notify_content_changed(&mut self, id: &DocumentId, content: impl Into<String>) {
        let content = content.into();
        if let Some(editor) = self.editor.as_mut() {
            if editor.document_id() == id && editor.text() != content {
                editor.replace(content.clone());
            }
        }
        self.content_changed(id, content);
    }

    fn content_changed(&mut self, id: &DocumentId, content: String) {
        self.engine.notify_content_changed(id, content);
        if let Some(doc) = self.documents.get_mut(id) {
            doc.has_unsaved_changes = self.engine.is_dirty(id);
        }
    }

    pub fn save_now(&mut self) {
        let Some(id) = self.tabs.active().cloned() else {
            return;
        };
        match self.engine.save_now(&id) {
            ManualSave::Started(request) => self.submit(request),
            ManualSave::Coalesced => {
                self.status_message = Some("A save is in progress; saving again right after".into());
            }
            ManualSave::Unknown => {}
        }
    }

    fn submit(&mut self, request: SaveRequest) {
        if let Some(doc) = self.documents.get_mut(&request.document_id) {
            doc.error = None;
        }
        self.dispatch.submit(request.into());
    }

    // ----- tabs -----

    pub fn select_tab(&mut self, id: &DocumentId) {
        let before = self.tabs.active().cloned();
        self.tabs.select_tab(id);
        self.after_tab_change(before);
    }

    pub fn select_shortcut(&mut self, digit: u8) {
        let before = self.tabs.active().cloned();
        self.tabs.select_shortcut(digit);
        self.after_tab_change(before);
    }

    pub fn select_next(&mut self) {
        let before = self.tabs.active().cloned();
        self.tabs.select_next();
        self.after_tab_change(before);
    }

    pub fn select_previous(&mut self) {
        let before = self.tabs.active().cloned();
        self.tabs.select_previous();
        self.after_tab_change(before);
    }

    pub fn reorder_tab(&mut self, source: usize, destination: usize) -> Result<(), TabError> {
        self.tabs.reorder_tab(source, destination)?;
        self.persist_tabs();
        Ok(())
    }

    /// Moves the active tab one slot left (`-1`) or right (`1`). Moves past
    /// either end are ignored.
    pub fn move_active_tab(&mut self, delta: isize) {
        let Some(index) = self.tabs.active_index() else {
            return;
        };
        let Some(target) = index.checked_add_signed(delta) else {
            return;
        };
        if target >= self.tabs.len() {
            return;
        }
        if let Err(err) = self.reorder_tab(index, target) {
            tracing::debug!(%err, "ignored tab move");
        }
    }

    pub fn open_document(&mut self, id: &DocumentId) {
        if !self.documents.contains_key(id) {
            tracing::debug!(document_id = %id, "ignoring open of unknown chapter");
            return;
        }
        let before = self.tabs.active().cloned();
        if !self.tabs.open_tab(id.clone()) {
            self.tabs.select_tab(id);
        }
        self.persist_tabs();
        self.after_tab_change(before);
    }

    pub fn open_next_unopened(&mut self) {
        let next = self
            .outline
            .known_ids()
            .iter()
            .find(|id| !self.tabs.contains(id))
            .cloned();
        match next {
            Some(id) => self.open_document(&id),
            None => self.status_message = Some("Every chapter is already open".into()),
        }
    }

    /// Closes a tab. A pending debounce is cancelled without saving; a save
    /// already in flight still lands. The remote chapter is never deleted.
    pub fn close_tab(&mut self, id: &DocumentId) {
        if !self.tabs.contains(id) {
            return;
        }
        if self.engine.has_pending_timer(id) {
            tracing::debug!(document_id = %id, "tab closed, pending save cancelled");
        }
        let before = self.tabs.active().cloned();
        self.tabs.close_tab(id);
        self.engine.detach(id);
        self.recovery.forget(id);
        if self
            .recovery_offer
            .as_ref()
            .map_or(false, |offer| &offer.document_id == id)
        {
            self.recovery_offer = None;
        }
        if self.editor.as_ref().map_or(false, |e| e.document_id() == id) {
            self.editor = None;
        }
        let in_outline = self.outline.known_ids().contains(id);
        if !in_outline {
            self.documents.shift_remove(id);
        } else if let Some(doc) = self.documents.get_mut(id) {
            doc.has_unsaved_changes = false;
        }
        self.persist_tabs();
        self.after_tab_change(before);
    }

    pub fn close_active_tab(&mut self) {
        if let Some(id) = self.tabs.active().cloned() {
            self.close_tab(&id);
        }
    }

    fn after_tab_change(&mut self, before: Option<DocumentId>) {
        if self.tabs.active() == before.as_ref() {
            return;
        }
        self.persist_tabs();
        self.activate_current();
    }

    fn persist_tabs(&mut self) {
        let Some(store) = &self.tab_store else {
            return;
        };
        if let Err(err) = store.save(&self.tabs) {
            tracing::warn!(%err, book_id = %self.book_id, "could not persist tab session");
            self.status_message = Some(format!("Open tabs will not be remembered: {err}"));
        }
    }

    fn activate_current(&mut self) {
        let Some(id) = self.tabs.active().cloned() else {
            self.editor = None;
            self.recovery_offer = None;
            return;
        };
        if self.editor.as_ref().map_or(false, |e| e.document_id() == &id) {
            return;
        }
        self.recovery_offer = None;

        let content = if self.engine.is_dirty(&id) || self.engine.is_in_flight(&id) {
            self.engine.buffer(&id).map(str::to_string)
        } else {
            None
        };
        let content = match content {
            Some(content) => content,
            None => match self.remote.load_content(&id) {
                Ok(content) => {
                    let last_saved = self
                        .engine
                        .status(&id)
                        .and_then(SaveStatus::last_saved_at);
                    self.engine.attach(&id, &content, last_saved);
                    content
                }
                Err(err) => {
                    tracing::warn!(document_id = %id, %err, "could not load chapter");
                    if let Some(doc) = self.documents.get_mut(&id) {
                        doc.error = Some(err.to_string());
                    }
                    self.editor = None;
                    return;
                }
            },
        };
        self.editor = Some(EditorBuffer::new(id.clone(), content));

        let remote_modified = self.documents.get(&id).and_then(|doc| doc.last_modified);
        self.recovery_offer = self.recovery.check_for_recovery(&id, remote_modified);
    }

    // ----- recovery -----

    pub fn restore_backup(&mut self) {
        let Some(offer) = self.recovery_offer.take() else {
            return;
        };
        let id = offer.document_id;
        match self.recovery.restore(&id, &mut self.engine) {
            Some(content) => {
                if let Some(editor) = self.editor.as_mut() {
                    if editor.document_id() == &id {
                        editor.replace(content);
                    }
                }
                if let Some(doc) = self.documents.get_mut(&id) {
                    doc.has_unsaved_changes = true;
                }
                self.status_message = Some("Backup restored; saving it now".into());
            }
            None => {
                self.status_message = Some("The backup is no longer available".into());
            }
        }
    }

    pub fn discard_backup(&mut self) {
        if let Some(offer) = self.recovery_offer.take() {
            self.recovery.discard(&offer.document_id);
        }
    }

    pub fn dismiss_recovery(&mut self) {
        self.recovery_offer = None;
    }

    // ----- background work -----

    /// Applies finished saves, starts due ones and pulls outline updates.
    /// Returns true when view state may have changed.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;
        for result in self.dispatch.try_results() {
            self.apply_save_result(result);
            changed = true;
        }
        for request in self.engine.poll_due() {
            self.submit(request);
            changed = true;
        }
        // inline dispatch completes synchronously
        for result in self.dispatch.try_results() {
            self.apply_save_result(result);
            changed = true;
        }

        if let Some(change) = self.outline.drain_feed() {
            self.apply_outline_change(change);
            changed = true;
        }
        let now = self.clock.now();
        match self.outline.poll(self.remote.as_ref(), now) {
            Ok(Some(change)) => {
                self.apply_outline_change(change);
                changed = true;
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, book_id = %self.book_id, "outline poll failed"),
        }
        changed
    }

    pub fn ingest_outline(&mut self, documents: Vec<DocumentMetadata>) {
        if let Some(change) = self.outline.ingest(documents) {
            self.apply_outline_change(change);
        }
    }

    pub fn attach_outline_feed(&mut self, feed: crossbeam_channel::Receiver<Vec<DocumentMetadata>>) {
        self.outline.attach_feed(feed);
    }

    pub fn time_until_next_deadline(&self) -> Option<StdDuration> {
        let deadline = self.engine.next_deadline()?;
        let remaining = deadline - self.clock.now();
        Some(StdDuration::try_from(remaining).unwrap_or(StdDuration::ZERO))
    }

    fn apply_save_result(&mut self, result: SaveResult) {
        let Some(event) = self.engine.complete(result.ticket, result.outcome) else {
            return;
        };
        if event.is_evicted() {
            return;
        }
        let dirty = self.engine.is_dirty(event.document_id());
        match event {
            AutoSaveEvent::Saved {
                document_id,
                timestamp,
                ..
            } => {
                if let Some(doc) = self.documents.get_mut(&document_id) {
                    doc.has_unsaved_changes = dirty;
                    doc.error = None;
                    doc.last_modified = Some(timestamp);
                }
            }
            AutoSaveEvent::Error {
                document_id,
                message,
                backup,
                ..
            } => {
                if let Some(doc) = self.documents.get_mut(&document_id) {
                    doc.has_unsaved_changes = true;
                    doc.error = Some(message);
                }
                if let BackupOutcome::Failed(err) = backup {
                    self.status_message = Some(format!(
                        "Local backup failed ({err}). Do not close Quill until a save succeeds."
                    ));
                }
            }
        }
    }

    fn apply_outline_change(&mut self, change: OutlineChange) {
        for meta in &change.documents {
            self.documents
                .entry(meta.id.clone())
                .and_modify(|doc| doc.apply_metadata(meta))
                .or_insert_with(|| Document::from_metadata(meta));
        }

        let before = self.tabs.active().cloned();
        let pruned = self.tabs.retain(|id| change.contains(id));
        for id in &pruned {
            tracing::info!(document_id = %id, "chapter removed remotely, closing tab");
            self.engine.detach(id);
            self.recovery.forget(id);
            if self.editor.as_ref().map_or(false, |e| e.document_id() == id) {
                self.editor = None;
            }
        }
        self.documents
            .retain(|id, _| change.contains(id) || self.tabs.contains(id));

        // keep documents in outline order, open placeholders last
        let order: Vec<DocumentId> = change.documents.iter().map(|doc| doc.id.clone()).collect();
        self.documents.sort_by(|a, _, b, _| {
            let pa = order.iter().position(|id| id == a).unwrap_or(usize::MAX);
            let pb = order.iter().position(|id| id == b).unwrap_or(usize::MAX);
            pa.cmp(&pb)
        });

        if !pruned.is_empty() {
            self.persist_tabs();
        }
        if self.tabs.active() != before.as_ref() || self.editor.is_none() {
            self.activate_current();
        }
    }

    /// Saves everything still pending and waits for in-flight saves, up to
    /// `timeout`.
    pub fn shutdown(&mut self, timeout: StdDuration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        // after the first failure nothing new is submitted, but saves already
        // in flight are still awaited so their failures get backed up
        let mut flushing = true;
        loop {
            if flushing {
                for request in self.engine.flush_all() {
                    self.submit(request);
                }
            }
            if self.dispatch.in_flight() == 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.dispatch.wait_result(remaining) {
                Some(result) => {
                    if result.outcome.is_ok() {
                        report.saved += 1;
                    } else {
                        flushing = false;
                    }
                    self.apply_save_result(result);
                }
                None => {
                    tracing::warn!(
                        in_flight = self.dispatch.in_flight(),
                        "gave up waiting for in-flight saves"
                    );
                    break;
                }
            }
        }
        for result in self.dispatch.try_results() {
            if result.outcome.is_ok() {
                report.saved += 1;
            }
            self.apply_save_result(result);
        }
        self.persist_tabs();
        report.unsaved = self.engine.pending_documents();
        if !report.unsaved.is_empty() {
            tracing::warn!(unsaved = report.unsaved.len(), "shutting down with unsaved chapters");
        }
        report
    }
}
