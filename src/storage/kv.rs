use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use super::{KeyValueStore, StorageError, StorageHandle};

/// [`KeyValueStore`] backed by the `kv` table of the client database.
///
/// `quota_bytes` caps the total size of keys plus values so the store fails
/// with [`StorageError::Full`] the way a browser's local storage would.
#[derive(Clone, Debug)]
pub struct SqliteKvStore {
    handle: StorageHandle,
    quota_bytes: Option<u64>,
}

impl SqliteKvStore {
    pub fn new(handle: StorageHandle) -> Self {
        let quota_bytes = handle.options().quota_bytes;
        Self {
            handle,
            quota_bytes,
        }
    }

    fn connection(&self) -> Result<Connection, StorageError> {
        self.handle
            .connect()
            .map_err(|err| StorageError::Unavailable(format!("{err:#}")))
    }

    fn used_bytes_excluding(conn: &Connection, key: &str) -> Result<u64, StorageError> {
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as u64)
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.connection()?;
        if let Some(quota) = self.quota_bytes {
            let used = Self::used_bytes_excluding(&conn, key)?;
            if used + (key.len() + value.len()) as u64 > quota {
                tracing::warn!(key, used, quota, "client storage quota exceeded");
                return Err(StorageError::Full);
            }
        }
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, OffsetDateTime::now_utc().unix_timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::storage;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn open_store(quota_bytes: Option<u64>) -> anyhow::Result<(TempDir, SqliteKvStore)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        let options = StorageOptions {
            quota_bytes,
            ..StorageOptions::default()
        };
        let handle = storage::init(&paths, &options)?;
        Ok((temp, SqliteKvStore::new(handle)))
    }

    #[test]
    fn set_get_remove_round_trip() -> anyhow::Result<()> {
        let (_temp, store) = open_store(None)?;
        assert_eq!(store.get("missing")?, None);
        store.set("chapter-backup:a", "first")?;
        store.set("chapter-backup:a", "second")?;
        assert_eq!(store.get("chapter-backup:a")?.as_deref(), Some("second"));
        store.remove("chapter-backup:a")?;
        store.remove("chapter-backup:a")?;
        assert_eq!(store.get("chapter-backup:a")?, None);
        Ok(())
    }

    #[test]
    fn quota_rejects_oversized_writes() -> anyhow::Result<()> {
        let (_temp, store) = open_store(Some(32))?;
        store.set("k1", "0123456789")?;
        assert_matches!(store.set("k2", &"x".repeat(40)), Err(StorageError::Full));
        assert_eq!(store.get("k2")?, None);
        Ok(())
    }

    #[test]
    fn prefix_listing_ignores_other_keys() -> anyhow::Result<()> {
        let (_temp, store) = open_store(None)?;
        store.set("chapter-backup:b", "1")?;
        store.set("chapter-backup:a", "1")?;
        store.set("tab-session:book", "1")?;
        assert_eq!(
            store.keys_with_prefix("chapter-backup:")?,
            vec!["chapter-backup:a".to_string(), "chapter-backup:b".to_string()]
        );
        Ok(())
    }
}
