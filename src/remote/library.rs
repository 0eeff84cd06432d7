use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use super::{RemoteError, RemoteStore};
use crate::config::{ConfigPaths, StorageOptions};
use crate::session::document::{
    estimate_reading_minutes, ChapterStatus, DocumentId, DocumentMetadata,
};
use crate::storage::{self, StorageHandle};

/// SQLite-backed reference implementation of the remote document store.
#[derive(Clone, Debug)]
pub struct LibraryStore {
    handle: StorageHandle,
}

impl LibraryStore {
    pub fn open(paths: &ConfigPaths, options: &StorageOptions) -> Result<Self> {
        let existed = paths.library_db_path.exists();
        let handle = storage::open_database(&paths.library_db_path, options, apply_schema)?;
        let store = Self { handle };
        if !existed {
            store.seed_default_book()?;
        }
        Ok(store)
    }

    fn connection(&self) -> Result<Connection, RemoteError> {
        self.handle
            .connect()
            .map_err(|err| RemoteError::Transient(format!("{err:#}")))
    }

    pub fn ensure_book(&self, book_id: &str, title: &str) -> Result<()> {
        self.handle.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO books (id, title) VALUES (?1, ?2)",
                params![book_id, title],
            )
            .context("inserting book")?;
            Ok(())
        })
    }

    pub fn create_chapter(&self, book_id: &str, title: &str, content: &str) -> Result<DocumentId> {
        let title = title.trim();
        if title.is_empty() {
            bail!("chapter title cannot be empty");
        }
        self.ensure_book(book_id, book_id)?;
        let id = DocumentId::new(Uuid::new_v4().to_string());
        let words = count_words(content);
        self.handle.with_connection(|conn| {
            let position: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(position), -1) + 1 FROM chapters WHERE book_id = ?1",
                    params![book_id],
                    |row| row.get(0),
                )
                .context("computing chapter position")?;
            conn.execute(
                "INSERT INTO chapters (id, book_id, position, title, status, content, word_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.as_str(),
                    book_id,
                    position,
                    title,
                    ChapterStatus::Draft.as_ref(),
                    content,
                    words,
                    OffsetDateTime::now_utc().unix_timestamp()
                ],
            )
            .context("inserting chapter")?;
            Ok(())
        })?;
        tracing::info!(chapter = %id, book_id, "created chapter");
        Ok(id)
    }

    pub fn rename_chapter(&self, id: &DocumentId, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            bail!("chapter title cannot be empty");
        }
        self.update_one(
            "UPDATE chapters SET title = ?1, updated_at = ?2 WHERE id = ?3",
            title,
            id,
        )
    }

    pub fn set_status(&self, id: &DocumentId, status: ChapterStatus) -> Result<()> {
        self.update_one(
            "UPDATE chapters SET status = ?1, updated_at = ?2 WHERE id = ?3",
            status.as_ref(),
            id,
        )
    }

    pub fn delete_chapter(&self, id: &DocumentId) -> Result<()> {
        self.handle.with_connection(|conn| {
            let deleted = conn
                .execute("DELETE FROM chapters WHERE id = ?1", params![id.as_str()])
                .context("deleting chapter")?;
            if deleted == 0 {
                bail!("chapter {id} not found");
            }
            Ok(())
        })
    }

    fn update_one(&self, sql: &str, value: &str, id: &DocumentId) -> Result<()> {
        self.handle.with_connection(|conn| {
            let updated = conn
                .execute(
                    sql,
                    params![value, OffsetDateTime::now_utc().unix_timestamp(), id.as_str()],
                )
                .with_context(|| format!("updating chapter {id}"))?;
            if updated == 0 {
                bail!("chapter {id} not found");
            }
            Ok(())
        })
    }

    fn seed_default_book(&self) -> Result<()> {
        tracing::info!("seeding first-run book");
        let book = crate::config::DEFAULT_BOOK_ID;
        self.ensure_book(book, "My first book")?;
        let chapters = [
            (
                "Opening",
                "# Opening\n\nEvery change you type is saved a few seconds after you pause.\n",
            ),
            (
                "Keyboard",
                "# Keyboard\n\n- Alt+1..9 jumps to a tab\n- Ctrl+S saves now\n- Ctrl+W closes the tab\n",
            ),
            ("Notes", "Loose ideas go here.\n"),
        ];
        for (title, body) in chapters {
            self.create_chapter(book, title, body)?;
        }
        Ok(())
    }
}

impl RemoteStore for LibraryStore {
    fn load_content(&self, id: &DocumentId) -> Result<String, RemoteError> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT content FROM chapters WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(classify)?
        .ok_or_else(|| RemoteError::NotFound(id.clone()))
    }

    fn save_content(&self, id: &DocumentId, content: &str) -> Result<(), RemoteError> {
        let conn = self.connection()?;
        let updated = conn
            .execute(
                "UPDATE chapters SET content = ?1, word_count = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    content,
                    count_words(content),
                    OffsetDateTime::now_utc().unix_timestamp(),
                    id.as_str()
                ],
            )
            .map_err(classify)?;
        if updated == 0 {
            return Err(RemoteError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn list_outline(&self, book_id: &str) -> Result<Vec<DocumentMetadata>, RemoteError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, status, word_count, updated_at
                 FROM chapters WHERE book_id = ?1 ORDER BY position, id",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![book_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(classify)?;
        let mut outline = Vec::new();
        for row in rows {
            let (id, title, status, word_count, updated_at) = row.map_err(classify)?;
            let status = status.parse::<ChapterStatus>().unwrap_or_else(|_| {
                tracing::warn!(chapter = %id, %status, "unknown chapter status, treating as draft");
                ChapterStatus::Draft
            });
            let word_count = u32::try_from(word_count).unwrap_or(0);
            outline.push(DocumentMetadata {
                id: DocumentId::new(id),
                title,
                status,
                word_count,
                estimated_reading_time: estimate_reading_minutes(word_count),
                last_modified: OffsetDateTime::from_unix_timestamp(updated_at)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            });
        }
        Ok(outline)
    }
}

fn classify(err: rusqlite::Error) -> RemoteError {
    match &err {
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(
                inner.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            RemoteError::Transient(err.to_string())
        }
        _ => RemoteError::Permanent(err.to_string()),
    }
}

fn count_words(content: &str) -> u32 {
    u32::try_from(content.unicode_words().count()).unwrap_or(u32::MAX)
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS books (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chapters (
            id TEXT PRIMARY KEY,
            book_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            content TEXT NOT NULL DEFAULT '',
            word_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS chapters_by_book ON chapters(book_id, position);
        "#,
    )
    .context("applying library schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn open_library() -> anyhow::Result<(TempDir, LibraryStore)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        let store = LibraryStore::open(&paths, &StorageOptions::default())?;
        Ok((temp, store))
    }

    #[test]
    fn first_open_seeds_default_book() -> anyhow::Result<()> {
        let (_temp, store) = open_library()?;
        let outline = store.list_outline(crate::config::DEFAULT_BOOK_ID)?;
        let titles: Vec<_> = outline.iter().map(|doc| doc.title.as_str()).collect();
        assert_eq!(titles, vec!["Opening", "Keyboard", "Notes"]);
        Ok(())
    }

    #[test]
    fn save_updates_content_and_word_count() -> anyhow::Result<()> {
        let (_temp, store) = open_library()?;
        let id = store.create_chapter("book", "Draft", "")?;
        store.save_content(&id, "one two three")?;
        // repeated saves are harmless
        store.save_content(&id, "one two three")?;
        assert_eq!(store.load_content(&id)?, "one two three");
        let outline = store.list_outline("book")?;
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].word_count, 3);
        assert_eq!(outline[0].estimated_reading_time, 1);
        Ok(())
    }

    #[test]
    fn missing_chapter_reports_not_found() -> anyhow::Result<()> {
        let (_temp, store) = open_library()?;
        let ghost = DocumentId::from("ghost");
        assert_matches!(store.load_content(&ghost), Err(RemoteError::NotFound(_)));
        assert_matches!(store.save_content(&ghost, "x"), Err(RemoteError::NotFound(_)));
        assert!(store.delete_chapter(&ghost).is_err());
        Ok(())
    }

    #[test]
    fn status_and_title_changes_show_in_outline() -> anyhow::Result<()> {
        let (_temp, store) = open_library()?;
        let id = store.create_chapter("book", "Working title", "")?;
        store.rename_chapter(&id, "Final title")?;
        store.set_status(&id, ChapterStatus::Completed)?;
        let outline = store.list_outline("book")?;
        assert_eq!(outline[0].title, "Final title");
        assert_eq!(outline[0].status, ChapterStatus::Completed);
        store.delete_chapter(&id)?;
        assert!(store.list_outline("book")?.is_empty());
        Ok(())
    }
}
