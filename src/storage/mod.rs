use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::config::{ConfigPaths, StorageOptions};

mod kv;
mod schema;

pub use kv::SqliteKvStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("local storage is full")]
    Full,
    #[error("local storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::DiskFull =>
            {
                StorageError::Full
            }
            _ => StorageError::Unavailable(err.to_string()),
        }
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Volatile store with an optional byte quota. Handy for tests and for
/// running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.inner.lock().quota_bytes = Some(quota_bytes);
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(StorageError::Unavailable("memory store disabled".into()));
        }
        Ok(inner.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(StorageError::Unavailable("memory store disabled".into()));
        }
        if let Some(quota) = inner.quota_bytes {
            let used: usize = inner
                .entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::Full);
            }
        }
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(StorageError::Unavailable("memory store disabled".into()));
        }
        inner.entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(StorageError::Unavailable("memory store disabled".into()));
        }
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[derive(Clone, Debug)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    open_database(&paths.client_db_path, storage, schema::apply)
}

pub fn open_database(
    db_path: &Path,
    storage: &StorageOptions,
    apply_schema: fn(&Connection) -> Result<()>,
) -> Result<StorageHandle> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    apply_schema(&conn)?;
    Ok(StorageHandle {
        db_path: Arc::new(db_path.to_path_buf()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    conn.busy_timeout(std::time::Duration::from_millis(storage.busy_timeout_ms))
        .context("setting busy timeout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn memory_store_enforces_quota() {
        let store = MemoryStore::with_quota(16);
        store.set("a", "12345").unwrap();
        assert_matches!(store.set("b", "1234567890123"), Err(StorageError::Full));
        // overwriting an existing key only counts the new value
        store.set("a", "123456789012345").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("123456789012345"));
    }

    #[test]
    fn memory_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        store.set_unavailable(true);
        assert_matches!(store.get("k"), Err(StorageError::Unavailable(_)));
        assert_matches!(store.set("k", "w"), Err(StorageError::Unavailable(_)));
        store.set_unavailable(false);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn memory_store_lists_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set("backup:a", "1").unwrap();
        store.set("backup:b", "2").unwrap();
        store.set("tabs:book", "3").unwrap();
        let keys = store.keys_with_prefix("backup:").unwrap();
        assert_eq!(keys, vec!["backup:a".to_string(), "backup:b".to_string()]);
    }
}
