use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use unicode_segmentation::UnicodeSegmentation;

use crate::clock::Clock;
use crate::journaling::autosave::AutoSaveEngine;
use crate::journaling::backup::LocalBackupStore;
use crate::journaling::status::relative_age;
use crate::session::document::DocumentId;

pub const PREVIEW_LIMIT: usize = 100;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid link regex"));
static MD_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s{0,3}(#{1,6}\s+|>\s?|[-*+]\s+|\d+\.\s+)|[*_`~]+").expect("valid marker regex")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOffer {
    pub document_id: DocumentId,
    pub preview: String,
    pub error: String,
    pub created_at: OffsetDateTime,
    pub age: Duration,
    pub age_label: String,
    /// Last remote modification known to the caller, shown next to the age.
    pub remote_last_modified: Option<OffsetDateTime>,
}

impl RecoveryOffer {
    /// The remote copy changed after the backup was taken. The offer is
    /// still made; the user decides.
    pub fn remote_is_newer(&self) -> bool {
        self.remote_last_modified
            .map_or(false, |remote| remote > self.created_at)
    }
}

#[derive(Debug)]
pub struct RecoveryCoordinator {
    backups: LocalBackupStore,
    clock: Arc<dyn Clock>,
    checked: HashSet<DocumentId>,
}

impl RecoveryCoordinator {
    pub fn new(backups: LocalBackupStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            backups,
            clock,
            checked: HashSet::new(),
        }
    }

    pub fn check_for_recovery(
        &mut self,
        id: &DocumentId,
        remote_last_modified: Option<OffsetDateTime>,
    ) -> Option<RecoveryOffer> {
        if !self.checked.insert(id.clone()) {
            return None;
        }
        let record = self.backups.get(id)?;
        let age = self.clock.now() - record.created_at;
        tracing::info!(document_id = %id, age = %relative_age(age), "offering local backup");
        Some(RecoveryOffer {
            document_id: id.clone(),
            preview: preview(&record.content),
            error: record.error,
            created_at: record.created_at,
            age,
            age_label: relative_age(age),
            remote_last_modified,
        })
    }

    pub fn forget(&mut self, id: &DocumentId) {
        self.checked.remove(id);
    }

    /// Moves the backup into the engine's buffer and clears the record.
    /// The engine schedules an immediate save of the restored content.
    pub fn restore(&mut self, id: &DocumentId, engine: &mut AutoSaveEngine) -> Option<String> {
        let record = self.backups.get(id)?;
        engine.restore(id, record.content.clone());
        if let Err(err) = self.backups.remove(id) {
            tracing::warn!(document_id = %id, %err, "restored backup could not be cleared");
        }
        tracing::info!(document_id = %id, "restored local backup");
        Some(record.content)
    }

    pub fn discard(&mut self, id: &DocumentId) {
        match self.backups.remove(id) {
            Ok(()) => tracing::debug!(document_id = %id, "discarded local backup"),
            Err(err) => tracing::warn!(document_id = %id, %err, "failed to discard local backup"),
        }
    }
}

pub fn preview(content: &str) -> String {
    let text = HTML_TAG.replace_all(content, " ");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_MARKERS.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim();

    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= PREVIEW_LIMIT {
        return text.to_string();
    }
    let mut out: String = graphemes[..PREVIEW_LIMIT - 1].concat();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AutoSaveConfig;
    use crate::storage::MemoryStore;
    use time::macros::datetime;

    struct Fixture {
        clock: ManualClock,
        backups: LocalBackupStore,
        coordinator: RecoveryCoordinator,
        engine: AutoSaveEngine,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(datetime!(2024-06-01 08:00 UTC));
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let backups = LocalBackupStore::new(kv, shared.clone(), Duration::days(7));
        Fixture {
            coordinator: RecoveryCoordinator::new(backups.clone(), shared.clone()),
            engine: AutoSaveEngine::new(&AutoSaveConfig::default(), backups.clone(), shared),
            clock,
            backups,
        }
    }

    #[test]
    fn preview_strips_markup_and_truncates() {
        insta::assert_snapshot!(
            preview("# Chapter *one*\n\n> It was a [dark](http://x) <b>night</b>."),
            @"Chapter one It was a dark night ."
        );
        let long = "word ".repeat(60);
        let short = preview(&long);
        assert_eq!(short.chars().count(), PREVIEW_LIMIT);
        assert!(short.ends_with("word…"));
    }

    #[test]
    fn reload_with_backup_offers_and_restores() {
        let mut f = fixture();
        let b = DocumentId::from("b");
        f.backups
            .record_failure(&b, "Recovered paragraph about the harbour.", "offline")
            .unwrap();
        f.clock.advance(Duration::minutes(10));

        f.engine.attach(&b, "remote text", None);
        let offer = f.coordinator.check_for_recovery(&b, None).unwrap();
        assert_eq!(offer.preview, "Recovered paragraph about the harbour.");
        assert_eq!(offer.error, "offline");
        assert_eq!(offer.age, Duration::minutes(10));
        assert_eq!(offer.age_label, "10m ago");

        let content = f.coordinator.restore(&b, &mut f.engine).unwrap();
        assert_eq!(content, "Recovered paragraph about the harbour.");
        assert_eq!(f.engine.buffer(&b), Some(content.as_str()));
        assert!(f.engine.is_dirty(&b));
        assert!(f.backups.get(&b).is_none());
        let due = f.engine.poll_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].content, content);
    }

    #[test]
    fn discard_leaves_buffer_and_is_idempotent() {
        let mut f = fixture();
        let b = DocumentId::from("b");
        f.backups.record_failure(&b, "stale", "offline").unwrap();
        f.engine.attach(&b, "remote text", None);
        assert!(f.coordinator.check_for_recovery(&b, None).is_some());
        f.coordinator.discard(&b);
        f.coordinator.discard(&b);
        assert!(f.backups.get(&b).is_none());
        assert_eq!(f.engine.buffer(&b), Some("remote text"));
        assert!(!f.engine.is_dirty(&b));
        assert!(f.coordinator.restore(&b, &mut f.engine).is_none());
    }

    #[test]
    fn offered_once_per_activation() {
        let mut f = fixture();
        let b = DocumentId::from("b");
        f.backups.record_failure(&b, "text", "offline").unwrap();
        assert!(f.coordinator.check_for_recovery(&b, None).is_some());
        assert!(f.coordinator.check_for_recovery(&b, None).is_none());
        f.coordinator.forget(&b);
        assert!(f.coordinator.check_for_recovery(&b, None).is_some());
    }

    #[test]
    fn offer_is_made_even_when_remote_is_newer() {
        let mut f = fixture();
        let b = DocumentId::from("b");
        f.backups.record_failure(&b, "old local text", "offline").unwrap();
        let remote_saved = datetime!(2024-06-01 09:00 UTC);
        f.clock.set(datetime!(2024-06-01 10:00 UTC));
        let offer = f.coordinator.check_for_recovery(&b, Some(remote_saved)).unwrap();
        assert!(offer.remote_is_newer());
        assert_eq!(offer.age_label, "2h ago");
    }

    #[test]
    fn no_offer_without_backup_or_after_expiry() {
        let mut f = fixture();
        let a = DocumentId::from("a");
        assert!(f.coordinator.check_for_recovery(&a, None).is_none());
        let b = DocumentId::from("b");
        f.backups.record_failure(&b, "text", "offline").unwrap();
        f.clock.advance(Duration::days(7));
        assert!(f.coordinator.check_for_recovery(&b, None).is_none());
    }
}
