use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::document::DocumentId;
use crate::session::tabs::TabSession;
use crate::storage::{KeyValueStore, StorageError};

const TAB_SESSION_KEY_PREFIX: &str = "tab-session:";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedTabs {
    pub tab_order: Vec<DocumentId>,
    #[serde(default)]
    pub active_document_id: Option<DocumentId>,
}

impl From<&TabSession> for PersistedTabs {
    fn from(tabs: &TabSession) -> Self {
        Self {
            tab_order: tabs.tab_order().to_vec(),
            active_document_id: tabs.active().cloned(),
        }
    }
}

impl From<PersistedTabs> for TabSession {
    fn from(persisted: PersistedTabs) -> Self {
        TabSession::from_parts(persisted.tab_order, persisted.active_document_id)
    }
}

#[derive(Clone)]
pub struct TabSessionStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl TabSessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, book_id: &str) -> Self {
        Self {
            store,
            key: format!("{TAB_SESSION_KEY_PREFIX}{book_id}"),
        }
    }

    /// Returns the stored session, or `None` if nothing usable is stored.
    /// Unreadable entries are removed.
    pub fn load(&self) -> Option<TabSession> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%err, key = %self.key, "could not read persisted tab session");
                return None;
            }
        };
        match serde_json::from_str::<PersistedTabs>(&raw) {
            Ok(persisted) => Some(persisted.into()),
            Err(err) => {
                tracing::debug!(%err, key = %self.key, "discarding malformed tab session");
                if let Err(err) = self.store.remove(&self.key) {
                    tracing::warn!(%err, key = %self.key, "failed to remove malformed tab session");
                }
                None
            }
        }
    }

    pub fn save(&self, tabs: &TabSession) -> Result<(), StorageError> {
        let json = serde_json::to_string(&PersistedTabs::from(tabs))
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        self.store.set(&self.key, &json)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn save_then_load_restores_order_and_active() {
        let kv = Arc::new(MemoryStore::new());
        let store = TabSessionStore::new(kv.clone(), "book-1");
        let mut tabs = TabSession::new();
        tabs.open_tab(DocumentId::from("a"));
        tabs.open_tab(DocumentId::from("b"));
        tabs.select_tab(&DocumentId::from("a"));
        store.save(&tabs).unwrap();

        let restored = TabSessionStore::new(kv, "book-1").load().unwrap();
        assert_eq!(restored, tabs);
    }

    #[test]
    fn persisted_layout_is_stable() {
        let tabs = TabSession::from_parts(
            vec![DocumentId::from("a"), DocumentId::from("b")],
            Some(DocumentId::from("b")),
        );
        let json = serde_json::to_string(&PersistedTabs::from(&tabs)).unwrap();
        insta::assert_snapshot!(json, @r#"{"tab_order":["a","b"],"active_document_id":"b"}"#);
    }

    #[test]
    fn sessions_are_scoped_per_book() {
        let kv = Arc::new(MemoryStore::new());
        let tabs = TabSession::from_parts(vec![DocumentId::from("a")], None);
        TabSessionStore::new(kv.clone(), "one").save(&tabs).unwrap();
        assert!(TabSessionStore::new(kv, "two").load().is_none());
    }

    #[test]
    fn malformed_entry_is_removed() {
        let kv = Arc::new(MemoryStore::new());
        kv.set("tab-session:book", "{\"tab_order\": 5}").unwrap();
        let store = TabSessionStore::new(kv.clone(), "book");
        assert!(store.load().is_none());
        assert!(kv.is_empty());
    }
}
