use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, ConfigPaths};

pub mod commands;

use self::commands::{BackupsCommand, ChapterCommand, Context as CommandContext, RecoverArgs};

#[derive(Parser, Debug)]
#[command(
    name = "quill",
    version,
    about = "Chapter editor with debounced auto-save and local backup recovery"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over QUILL_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over QUILL_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive editor (default)
    Tui,
    /// Print the outline of the active book
    Outline,
    /// Administer chapters in the library
    #[command(subcommand)]
    Chapter(ChapterCommand),
    /// Inspect and clean up local backups
    #[command(subcommand)]
    Backups(BackupsCommand),
    /// Show, restore or discard the local backup of one chapter
    Recover(RecoverArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("QUILL_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("QUILL_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    // the terminal UI owns the screen, so its logs go to a file
    let log_file = matches!(command, Commands::Tui).then(|| tui_log_path(&paths));
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let config = loader.load_or_init()?;
    let ctx = CommandContext::open(Arc::new(config), paths)?;
    match command {
        Commands::Tui => commands::run_tui(&ctx),
        Commands::Outline => commands::print_outline(&ctx),
        Commands::Chapter(cmd) => commands::handle_chapter_command(&ctx, cmd),
        Commands::Backups(cmd) => commands::handle_backups_command(&ctx, cmd),
        Commands::Recover(args) => commands::recover(&ctx, args),
    }
}

fn tui_log_path(paths: &ConfigPaths) -> PathBuf {
    paths.log_dir.join("quill.log")
}

fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_to_tui() {
        let cli = Cli::try_parse_from(["quill"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::try_parse_from(["quill", "chapter", "rename", "abc", "New title"]).unwrap();
        assert_matches!(
            cli.command,
            Some(Commands::Chapter(ChapterCommand::Rename(args))) if args.title == "New title"
        );

        let cli = Cli::try_parse_from(["quill", "recover", "abc", "--restore"]).unwrap();
        assert_matches!(cli.command, Some(Commands::Recover(args)) if args.restore && !args.discard);
    }

    #[test]
    fn restore_and_discard_conflict() {
        let err = Cli::try_parse_from(["quill", "recover", "abc", "--restore", "--discard"]);
        assert!(err.is_err());
    }
}
