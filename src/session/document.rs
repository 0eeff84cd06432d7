use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Reading speed used for `estimated_reading_time`.
pub const WORDS_PER_MINUTE: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChapterStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
    Published,
}

impl ChapterStatus {
    pub fn label(self) -> &'static str {
        match self {
            ChapterStatus::Draft => "Draft",
            ChapterStatus::InProgress => "In progress",
            ChapterStatus::Completed => "Completed",
            ChapterStatus::Published => "Published",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentMetadata {
    pub id: DocumentId,
    pub title: String,
    pub status: ChapterStatus,
    pub word_count: u32,
    pub estimated_reading_time: u32,
    pub last_modified: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub status: ChapterStatus,
    pub word_count: u32,
    pub estimated_reading_time: u32,
    pub last_modified: Option<OffsetDateTime>,
    pub has_unsaved_changes: bool,
    pub error: Option<String>,
    pub is_loading: bool,
}

impl Document {
    /// Stand-in shown for a restored tab until the outline resolves it.
    pub fn placeholder(id: DocumentId) -> Self {
        Self {
            title: String::new(),
            id,
            status: ChapterStatus::Draft,
            word_count: 0,
            estimated_reading_time: 0,
            last_modified: None,
            has_unsaved_changes: false,
            error: None,
            is_loading: true,
        }
    }

    pub fn from_metadata(meta: &DocumentMetadata) -> Self {
        let mut doc = Self::placeholder(meta.id.clone());
        doc.apply_metadata(meta);
        doc
    }

    /// Refreshes remote-owned fields. Local edit state is left alone.
    pub fn apply_metadata(&mut self, meta: &DocumentMetadata) {
        self.title = meta.title.clone();
        self.status = meta.status;
        self.word_count = meta.word_count;
        self.estimated_reading_time = meta.estimated_reading_time;
        self.last_modified = Some(meta.last_modified);
        self.is_loading = false;
    }

    pub fn display_title(&self) -> &str {
        if self.is_loading {
            "Loading…"
        } else if self.title.trim().is_empty() {
            "Untitled chapter"
        } else {
            &self.title
        }
    }
}

pub fn estimate_reading_minutes(word_count: u32) -> u32 {
    if word_count == 0 {
        0
    } else {
        word_count.div_ceil(WORDS_PER_MINUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use time::macros::datetime;

    #[test]
    fn status_parses_snake_case() {
        assert_eq!(
            ChapterStatus::from_str("in_progress").unwrap(),
            ChapterStatus::InProgress
        );
        assert_eq!(ChapterStatus::Published.to_string(), "published");
        assert!(ChapterStatus::from_str("archived").is_err());
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(estimate_reading_minutes(0), 0);
        assert_eq!(estimate_reading_minutes(1), 1);
        assert_eq!(estimate_reading_minutes(200), 1);
        assert_eq!(estimate_reading_minutes(201), 2);
    }

    #[test]
    fn metadata_refresh_keeps_unsaved_flag() {
        let mut doc = Document::placeholder(DocumentId::from("c1"));
        assert_eq!(doc.display_title(), "Loading…");
        doc.has_unsaved_changes = true;
        doc.apply_metadata(&DocumentMetadata {
            id: DocumentId::from("c1"),
            title: "Opening".into(),
            status: ChapterStatus::InProgress,
            word_count: 420,
            estimated_reading_time: 3,
            last_modified: datetime!(2024-05-01 09:00 UTC),
        });
        assert!(doc.has_unsaved_changes);
        assert!(!doc.is_loading);
        assert_eq!(doc.display_title(), "Opening");
    }
}
