use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::session::document::DocumentId;
use crate::storage::{KeyValueStore, StorageError};

pub const BACKUP_KEY_PREFIX: &str = "chapter-backup:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub document_id: DocumentId,
    pub content: String,
    pub created_at: OffsetDateTime,
    /// Failure that caused the backup to be written.
    pub error: String,
    pub ttl_expires_at: OffsetDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBackup {
    document_id: String,
    content: String,
    created_at: String,
    error: String,
    ttl_expires_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum Rejection {
    Malformed(String),
    Expired,
}

#[derive(Clone)]
pub struct LocalBackupStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl std::fmt::Debug for LocalBackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackupStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl LocalBackupStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(id: &DocumentId) -> String {
        format!("{BACKUP_KEY_PREFIX}{id}")
    }

    pub fn get(&self, id: &DocumentId) -> Option<BackupRecord> {
        let key = Self::key(id);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%err, document_id = %id, "could not read local backup");
                return None;
            }
        };
        match self.validate(id, &raw) {
            Ok(record) => Some(record),
            Err(rejection) => {
                tracing::debug!(document_id = %id, ?rejection, "dropping unusable local backup");
                self.remove_quietly(&key);
                None
            }
        }
    }

    pub fn set(&self, record: &BackupRecord) -> Result<(), StorageError> {
        let stored = StoredBackup {
            document_id: record.document_id.to_string(),
            content: record.content.clone(),
            created_at: format_timestamp(record.created_at)?,
            error: record.error.clone(),
            ttl_expires_at: format_timestamp(record.ttl_expires_at)?,
        };
        let json = serde_json::to_string(&stored)
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        self.store.set(&Self::key(&record.document_id), &json)
    }

    pub fn record_failure(
        &self,
        id: &DocumentId,
        content: &str,
        error: &str,
    ) -> Result<BackupRecord, StorageError> {
        let created_at = self.clock.now();
        let record = BackupRecord {
            document_id: id.clone(),
            content: content.to_string(),
            created_at,
            error: error.to_string(),
            ttl_expires_at: created_at + self.ttl,
        };
        self.set(&record)?;
        Ok(record)
    }

    pub fn remove(&self, id: &DocumentId) -> Result<(), StorageError> {
        self.store.remove(&Self::key(id))
    }

    /// Every valid backup, oldest first. Invalid ones are removed on the way.
    pub fn list(&self) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = self
            .backup_ids()
            .iter()
            .filter_map(|id| self.get(id))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for id in self.backup_ids() {
            report.examined += 1;
            if self.get(&id).is_none() {
                report.removed += 1;
            }
        }
        if report.removed > 0 {
            tracing::info!(
                examined = report.examined,
                removed = report.removed,
                "swept local backups"
            );
        }
        report
    }

    fn backup_ids(&self) -> Vec<DocumentId> {
        match self.store.keys_with_prefix(BACKUP_KEY_PREFIX) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| {
                    key.strip_prefix(BACKUP_KEY_PREFIX)
                        .map(|id| DocumentId::new(id))
                })
                .collect(),
            Err(err) => {
                tracing::warn!(%err, "could not list local backups");
                Vec::new()
            }
        }
    }

    fn validate(&self, id: &DocumentId, raw: &str) -> Result<BackupRecord, Rejection> {
        let stored: StoredBackup =
            serde_json::from_str(raw).map_err(|err| Rejection::Malformed(err.to_string()))?;
        if stored.document_id != id.as_str() {
            return Err(Rejection::Malformed(format!(
                "record belongs to {}",
                stored.document_id
            )));
        }
        let created_at = parse_timestamp(&stored.created_at)?;
        let ttl_expires_at = parse_timestamp(&stored.ttl_expires_at)?;
        if ttl_expires_at < created_at {
            return Err(Rejection::Malformed("expiry precedes creation".into()));
        }
        let now = self.clock.now();
        if now >= ttl_expires_at || now >= created_at + self.ttl {
            return Err(Rejection::Expired);
        }
        Ok(BackupRecord {
            document_id: id.clone(),
            content: stored.content,
            created_at,
            error: stored.error,
            ttl_expires_at,
        })
    }

    fn remove_quietly(&self, key: &str) {
        if let Err(err) = self.store.remove(key) {
            tracing::warn!(%err, key, "failed to remove unusable local backup");
        }
    }
}

fn format_timestamp(at: OffsetDateTime) -> Result<String, StorageError> {
    at.format(&Rfc3339)
        .map_err(|err| StorageError::Unavailable(format!("formatting timestamp: {err}")))
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, Rejection> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| Rejection::Malformed(format!("bad timestamp {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;
    use time::macros::datetime;

    fn fixture() -> (Arc<MemoryStore>, ManualClock, LocalBackupStore) {
        let kv = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(datetime!(2024-06-01 08:00 UTC));
        let backups = LocalBackupStore::new(kv.clone(), Arc::new(clock.clone()), Duration::days(7));
        (kv, clock, backups)
    }

    #[test]
    fn record_failure_round_trips() {
        let (_kv, _clock, backups) = fixture();
        let id = DocumentId::from("ch-1");
        let written = backups.record_failure(&id, "draft text", "offline").unwrap();
        assert_eq!(written.ttl_expires_at, datetime!(2024-06-08 08:00 UTC));
        assert_eq!(backups.get(&id), Some(written));
    }

    #[test]
    fn newer_backup_overwrites_older() {
        let (kv, clock, backups) = fixture();
        let id = DocumentId::from("ch-1");
        backups.record_failure(&id, "first", "offline").unwrap();
        clock.advance(Duration::minutes(5));
        backups.record_failure(&id, "second", "timeout").unwrap();
        let record = backups.get(&id).unwrap();
        assert_eq!(record.content, "second");
        assert_eq!(record.error, "timeout");
        assert_eq!(kv.len(), 1);
    }

    #[test]
    fn expired_backup_is_absent_and_removed() {
        let (kv, clock, backups) = fixture();
        let id = DocumentId::from("ch-1");
        backups.record_failure(&id, "text", "offline").unwrap();
        clock.advance(Duration::days(7) - Duration::seconds(1));
        assert!(backups.get(&id).is_some());
        clock.advance(Duration::seconds(1));
        assert!(backups.get(&id).is_none());
        assert!(kv.is_empty());
    }

    #[test]
    fn stored_expiry_beyond_ttl_is_still_capped() {
        let (kv, clock, backups) = fixture();
        let id = DocumentId::from("ch-1");
        kv.set(
            "chapter-backup:ch-1",
            r#"{"document_id":"ch-1","content":"x","created_at":"2024-06-01T08:00:00Z","error":"e","ttl_expires_at":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(backups.get(&id).is_some());
        clock.advance(Duration::days(8));
        assert!(backups.get(&id).is_none());
    }

    #[test]
    fn malformed_records_self_heal() {
        let (kv, _clock, backups) = fixture();
        let cases = [
            ("a", "not json"),
            ("b", r#"{"document_id":"b","content":"x"}"#),
            (
                "c",
                r#"{"document_id":"c","content":42,"created_at":"2024-06-01T08:00:00Z","error":"e","ttl_expires_at":"2024-06-02T08:00:00Z"}"#,
            ),
            (
                "d",
                r#"{"document_id":"d","content":"x","created_at":"yesterday","error":"e","ttl_expires_at":"2024-06-02T08:00:00Z"}"#,
            ),
            (
                "e",
                r#"{"document_id":"other","content":"x","created_at":"2024-06-01T08:00:00Z","error":"e","ttl_expires_at":"2024-06-02T08:00:00Z"}"#,
            ),
        ];
        for (id, raw) in cases {
            kv.set(&format!("{BACKUP_KEY_PREFIX}{id}"), raw).unwrap();
            assert_eq!(backups.get(&DocumentId::from(id)), None, "case {id}");
        }
        assert!(kv.is_empty());
    }

    #[test]
    fn sweep_removes_only_stale_entries() {
        let (kv, clock, backups) = fixture();
        backups
            .record_failure(&DocumentId::from("old"), "x", "offline")
            .unwrap();
        clock.advance(Duration::days(6));
        backups
            .record_failure(&DocumentId::from("fresh"), "y", "offline")
            .unwrap();
        kv.set("chapter-backup:junk", "{").unwrap();
        kv.set("tab-session:book", "{}").unwrap();
        clock.advance(Duration::days(2));

        let report = backups.sweep();
        assert_eq!(report, SweepReport { examined: 3, removed: 2 });
        let remaining: Vec<_> = backups.list().into_iter().map(|r| r.document_id).collect();
        assert_eq!(remaining, vec![DocumentId::from("fresh")]);
        assert_eq!(kv.get("tab-session:book").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn full_storage_surfaces_as_error() {
        let kv = Arc::new(MemoryStore::with_quota(64));
        let clock = ManualClock::new(datetime!(2024-06-01 08:00 UTC));
        let backups = LocalBackupStore::new(kv, Arc::new(clock), Duration::days(7));
        let result = backups.record_failure(&DocumentId::from("big"), &"x".repeat(500), "offline");
        assert_matches!(result, Err(StorageError::Full));
    }
}
