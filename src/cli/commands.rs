use std::fmt::Write as _;
use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Args, Subcommand};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::app::{App, WorkspaceDeps};
use crate::clock::{self, Clock};
use crate::config::{AppConfig, ConfigPaths};
use crate::journaling::status::relative_age;
use crate::journaling::{
    AutoSaveEngine, AutoSaveEvent, BackupRecord, LocalBackupStore, RecoveryCoordinator,
    RecoveryOffer,
};
use crate::remote::{InlineDispatch, LibraryStore, RemoteStore, SaveDispatch, ThreadedDispatch};
use crate::session::{ChapterStatus, DocumentId, DocumentMetadata};
use crate::storage::{self, KeyValueStore, SqliteKvStore};

#[derive(Subcommand, Debug, Clone)]
pub enum ChapterCommand {
    /// Append a new chapter to the active book
    New(ChapterNewArgs),
    /// Change a chapter's title
    Rename(ChapterRenameArgs),
    /// Set a chapter's workflow status
    Status(ChapterStatusArgs),
    /// Delete a chapter; open tabs close on the next outline refresh
    Delete(ChapterIdArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ChapterNewArgs {
    /// Chapter title
    pub title: String,
    /// Initial content. If omitted, reads from stdin when it is piped.
    #[arg(long)]
    pub body: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ChapterRenameArgs {
    pub id: String,
    pub title: String,
}

#[derive(Args, Debug, Clone)]
pub struct ChapterStatusArgs {
    pub id: String,
    /// draft, in_progress, completed or published
    pub status: ChapterStatus,
}

#[derive(Args, Debug, Clone)]
pub struct ChapterIdArgs {
    pub id: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BackupsCommand {
    /// List every valid local backup, oldest first
    List,
    /// Remove expired or unreadable backups
    Sweep,
    /// Delete the backup of one chapter
    Discard(ChapterIdArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    pub id: String,
    /// Save the backup content to the library and clear the backup
    #[arg(long, conflicts_with = "discard")]
    pub restore: bool,
    /// Throw the backup away
    #[arg(long)]
    pub discard: bool,
}

/// Everything a command needs, opened once per invocation.
pub struct Context {
    pub config: Arc<AppConfig>,
    pub paths: ConfigPaths,
    client_store: Arc<SqliteKvStore>,
    library: Arc<LibraryStore>,
    clock: Arc<dyn Clock>,
}

impl Context {
    pub fn open(config: Arc<AppConfig>, paths: ConfigPaths) -> Result<Self> {
        let client = storage::init(&paths, &config.storage).context("opening client storage")?;
        let library = LibraryStore::open(&paths, &config.storage).context("opening library")?;
        library.ensure_book(&config.book.id, &config.book.id)?;
        Ok(Self {
            config,
            paths,
            client_store: Arc::new(SqliteKvStore::new(client)),
            library: Arc::new(library),
            clock: clock::system(),
        })
    }

    fn remote(&self) -> Arc<dyn RemoteStore> {
        self.library.clone()
    }

    fn kv(&self) -> Arc<dyn KeyValueStore> {
        self.client_store.clone()
    }

    fn backups(&self) -> LocalBackupStore {
        LocalBackupStore::new(self.kv(), self.clock.clone(), self.config.auto_save.backup_ttl())
    }

    fn outline(&self) -> Result<Vec<DocumentMetadata>> {
        self.library
            .list_outline(&self.config.book.id)
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("listing outline of book {}", self.config.book.id))
    }
}

pub fn run_tui(ctx: &Context) -> Result<()> {
    let dispatch = ThreadedDispatch::spawn(ctx.remote())?;
    let deps = WorkspaceDeps {
        clock: ctx.clock.clone(),
        client_store: ctx.kv(),
        remote: ctx.remote(),
        dispatch: Box::new(dispatch),
    };
    let app = App::new(&ctx.config, deps);
    let report = app.run()?;
    tracing::info!(saved = report.saved, unsaved = report.unsaved.len(), "session closed");
    if !report.unsaved.is_empty() {
        eprintln!(
            "{} chapter(s) could not be saved; their content is kept as a local backup:",
            report.unsaved.len()
        );
        for id in &report.unsaved {
            eprintln!("  {id}  (quill recover {id})");
        }
    }
    Ok(())
}

pub fn print_outline(ctx: &Context) -> Result<()> {
    let outline = ctx.outline()?;
    let backups = ctx.backups();
    print!("{}", render_outline(&outline, |id| backups.get(id).is_some()));
    Ok(())
}

fn render_outline(outline: &[DocumentMetadata], has_backup: impl Fn(&DocumentId) -> bool) -> String {
    if outline.is_empty() {
        return "(no chapters)\n".to_string();
    }
    let mut out = String::new();
    for (position, chapter) in outline.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}. {}  [{}]  {} words, {} min{}\n     {}",
            position + 1,
            chapter.title,
            chapter.status.label(),
            chapter.word_count,
            chapter.estimated_reading_time,
            if has_backup(&chapter.id) { "  (local backup)" } else { "" },
            chapter.id,
        );
    }
    out
}

pub fn handle_chapter_command(ctx: &Context, command: ChapterCommand) -> Result<()> {
    match command {
        ChapterCommand::New(args) => {
            let body = match args.body {
                Some(body) => body,
                None => read_stdin_if_piped()?.unwrap_or_default(),
            };
            let id = ctx
                .library
                .create_chapter(&ctx.config.book.id, &args.title, &body)?;
            println!("Created chapter {id} ({})", args.title.trim());
        }
        ChapterCommand::Rename(args) => {
            let id = DocumentId::from(args.id);
            ctx.library.rename_chapter(&id, &args.title)?;
            println!("Renamed chapter {id} to '{}'", args.title.trim());
        }
        ChapterCommand::Status(args) => {
            let id = DocumentId::from(args.id);
            ctx.library.set_status(&id, args.status)?;
            println!("Chapter {id} is now {}", args.status.label());
        }
        ChapterCommand::Delete(args) => {
            let id = DocumentId::from(args.id);
            ctx.library.delete_chapter(&id)?;
            if ctx.backups().get(&id).is_some() {
                println!("Deleted chapter {id}. A local backup remains; see `quill backups list`.");
            } else {
                println!("Deleted chapter {id}");
            }
        }
    }
    Ok(())
}

fn read_stdin_if_piped() -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading chapter body from stdin")?;
    Ok(Some(buf))
}

pub fn handle_backups_command(ctx: &Context, command: BackupsCommand) -> Result<()> {
    let backups = ctx.backups();
    match command {
        BackupsCommand::List => {
            let records = backups.list();
            print!("{}", render_backups(&records, ctx.clock.now()));
        }
        BackupsCommand::Sweep => {
            let report = backups.sweep();
            println!(
                "Examined {} backup(s), removed {}",
                report.examined, report.removed
            );
        }
        BackupsCommand::Discard(args) => {
            let id = DocumentId::from(args.id);
            if backups.get(&id).is_none() {
                bail!("no local backup for chapter {id}");
            }
            backups
                .remove(&id)
                .with_context(|| format!("removing backup of chapter {id}"))?;
            println!("Discarded backup of chapter {id}");
        }
    }
    Ok(())
}

fn render_backups(records: &[BackupRecord], now: OffsetDateTime) -> String {
    if records.is_empty() {
        return "(no local backups)\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let created = record
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| record.created_at.to_string());
        let _ = writeln!(
            out,
            "{}  {} ({})  {} chars  error: {}",
            record.document_id,
            created,
            relative_age(now - record.created_at),
            record.content.chars().count(),
            record.error,
        );
    }
    out
}

#[derive(Debug)]
pub enum RecoverOutcome {
    NoBackup,
    Offered(RecoveryOffer),
    Restored,
    /// The restored content could not be saved; a fresh backup was written.
    RestoreFailed(String),
    Discarded,
}

pub fn recover(ctx: &Context, args: RecoverArgs) -> Result<()> {
    let id = DocumentId::from(args.id.as_str());
    match recover_chapter(ctx, &id, &args)? {
        RecoverOutcome::NoBackup => println!("No local backup for chapter {id}"),
        RecoverOutcome::Offered(offer) => {
            println!("Backup of chapter {id}, saved {} after: {}", offer.age_label, offer.error);
            if offer.remote_is_newer() {
                println!("The library copy changed after this backup was taken.");
            }
            println!("\n{}\n", offer.preview);
            println!("Run with --restore to save it, or --discard to throw it away.");
        }
        RecoverOutcome::Restored => println!("Restored chapter {id} from its local backup"),
        RecoverOutcome::RestoreFailed(message) => {
            bail!("restoring chapter {id} failed: {message}; the backup was kept")
        }
        RecoverOutcome::Discarded => println!("Discarded backup of chapter {id}"),
    }
    Ok(())
}

pub fn recover_chapter(ctx: &Context, id: &DocumentId, args: &RecoverArgs) -> Result<RecoverOutcome> {
    let backups = ctx.backups();
    let remote_modified = ctx
        .outline()?
        .into_iter()
        .find(|chapter| &chapter.id == id)
        .map(|chapter| chapter.last_modified);
    let mut recovery = RecoveryCoordinator::new(backups.clone(), ctx.clock.clone());
    let Some(offer) = recovery.check_for_recovery(id, remote_modified) else {
        return Ok(RecoverOutcome::NoBackup);
    };

    if args.discard {
        recovery.discard(id);
        return Ok(RecoverOutcome::Discarded);
    }
    if !args.restore {
        return Ok(RecoverOutcome::Offered(offer));
    }

    let mut engine = AutoSaveEngine::new(&ctx.config.auto_save, backups, ctx.clock.clone());
    recovery.restore(id, &mut engine);
    let mut dispatch = InlineDispatch::new(ctx.remote());
    for request in engine.flush_all() {
        dispatch.submit(request.into());
    }
    let mut outcome = RecoverOutcome::RestoreFailed("save did not run".to_string());
    for result in dispatch.try_results() {
        match engine.complete(result.ticket, result.outcome) {
            Some(AutoSaveEvent::Saved { .. }) => outcome = RecoverOutcome::Restored,
            Some(AutoSaveEvent::Error { message, .. }) => {
                outcome = RecoverOutcome::RestoreFailed(message)
            }
            None => {}
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;
    use time::macros::datetime;

    fn context(dir: &TempDir) -> Context {
        let paths = ConfigPaths::rooted_at(dir.path());
        paths.ensure_directories().unwrap();
        Context::open(Arc::new(AppConfig::default()), paths).unwrap()
    }

    fn args(id: &DocumentId, restore: bool, discard: bool) -> RecoverArgs {
        RecoverArgs {
            id: id.to_string(),
            restore,
            discard,
        }
    }

    #[test]
    fn first_run_seeds_an_outline() -> Result<()> {
        let dir = TempDir::new()?;
        let ctx = context(&dir);
        let titles: Vec<String> = ctx.outline()?.into_iter().map(|c| c.title).collect();
        assert_eq!(titles, ["Opening", "Keyboard", "Notes"]);
        Ok(())
    }

    #[test]
    fn recover_restore_writes_backup_to_library() -> Result<()> {
        let dir = TempDir::new()?;
        let ctx = context(&dir);
        let id = ctx.outline()?[0].id.clone();
        ctx.backups()
            .record_failure(&id, "recovered words", "network down")
            .unwrap();

        assert_matches!(
            recover_chapter(&ctx, &id, &args(&id, false, false))?,
            RecoverOutcome::Offered(offer) if offer.preview == "recovered words"
        );
        assert_matches!(
            recover_chapter(&ctx, &id, &args(&id, true, false))?,
            RecoverOutcome::Restored
        );
        assert_eq!(ctx.library.load_content(&id).unwrap(), "recovered words");
        assert!(ctx.backups().get(&id).is_none());
        assert_matches!(
            recover_chapter(&ctx, &id, &args(&id, true, false))?,
            RecoverOutcome::NoBackup
        );
        Ok(())
    }

    #[test]
    fn recover_restore_of_deleted_chapter_keeps_backup() -> Result<()> {
        let dir = TempDir::new()?;
        let ctx = context(&dir);
        let id = ctx.outline()?[2].id.clone();
        ctx.backups().record_failure(&id, "orphan", "timeout").unwrap();
        ctx.library.delete_chapter(&id)?;

        assert_matches!(
            recover_chapter(&ctx, &id, &args(&id, true, false))?,
            RecoverOutcome::RestoreFailed(_)
        );
        assert_eq!(ctx.backups().get(&id).map(|r| r.content), Some("orphan".into()));
        Ok(())
    }

    #[test]
    fn recover_discard_removes_backup() -> Result<()> {
        let dir = TempDir::new()?;
        let ctx = context(&dir);
        let id = ctx.outline()?[1].id.clone();
        ctx.backups().record_failure(&id, "x", "boom").unwrap();
        assert_matches!(
            recover_chapter(&ctx, &id, &args(&id, false, true))?,
            RecoverOutcome::Discarded
        );
        assert!(ctx.backups().list().is_empty());
        Ok(())
    }

    #[test]
    fn outline_rendering_marks_backups() {
        let outline = vec![DocumentMetadata {
            id: DocumentId::from("c1"),
            title: "Opening".into(),
            status: ChapterStatus::InProgress,
            word_count: 450,
            estimated_reading_time: 3,
            last_modified: datetime!(2024-06-01 00:00 UTC),
        }];
        assert_eq!(
            render_outline(&outline, |_| true),
            "  1. Opening  [In progress]  450 words, 3 min  (local backup)\n     c1\n"
        );
        assert_eq!(render_outline(&[], |_| false), "(no chapters)\n");
    }
}
