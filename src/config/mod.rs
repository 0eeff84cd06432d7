use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::Duration;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Quill";
const APP_NAME: &str = "quill";

pub const DEFAULT_BOOK_ID: &str = "default";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load();
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load();
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    /// Durable client storage: local backups and persisted tab sessions.
    pub client_db_path: PathBuf,
    /// Reference remote document store.
    pub library_db_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("QUILL_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("QUILL_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self {
            config_dir,
            config_file,
            client_db_path: data_root.join("client.db"),
            library_db_path: data_root.join("library.db"),
            data_dir: data_root,
            log_dir: state_dir.join("logs"),
            state_dir,
        })
    }

    /// Lays every directory out under `base`; used for throwaway profiles.
    pub fn rooted_at(base: &Path) -> Self {
        let config_dir = base.join("config");
        let data_dir = base.join("data");
        let state_dir = base.join("state");
        Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            client_db_path: data_dir.join("client.db"),
            library_db_path: data_dir.join("library.db"),
            data_dir,
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub book: BookOptions,
    pub auto_save: AutoSaveConfig,
    pub session: SessionConfig,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            book: BookOptions::default(),
            auto_save: AutoSaveConfig::default(),
            session: SessionConfig::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self) {
        if self.book.id.trim().is_empty() {
            tracing::warn!("empty book id in config, falling back to default");
            self.book.id = DEFAULT_BOOK_ID.to_string();
        }
        if self.auto_save.backup_ttl_hours == 0 {
            tracing::warn!("backup_ttl_hours must be positive, using 7 days");
            self.auto_save.backup_ttl_hours = AutoSaveConfig::default().backup_ttl_hours;
        }
        if self.session.compact_tab_threshold == 0 {
            self.session.compact_tab_threshold = SessionConfig::default().compact_tab_threshold;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookOptions {
    pub id: String,
}

impl Default for BookOptions {
    fn default() -> Self {
        Self {
            id: DEFAULT_BOOK_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    /// Local backups older than this are discarded on read and on sweep.
    pub backup_ttl_hours: u64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 3_000,
            backup_ttl_hours: 24 * 7,
        }
    }
}

impl AutoSaveConfig {
    pub fn debounce_duration(&self) -> Duration {
        Duration::milliseconds(self.debounce_ms as i64)
    }

    pub fn backup_ttl(&self) -> Duration {
        Duration::hours(self.backup_ttl_hours.max(1) as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub persist_tabs: bool,
    /// Pull interval for outline refreshes (0 = push notifications only).
    pub outline_poll_secs: u64,
    /// Switch the tab strip to its compact form above this many tabs.
    pub compact_tab_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist_tabs: true,
            outline_poll_secs: 30,
            compact_tab_threshold: 8,
        }
    }
}

impl SessionConfig {
    pub fn outline_poll_interval(&self) -> Option<Duration> {
        if self.outline_poll_secs == 0 {
            None
        } else {
            Some(Duration::seconds(self.outline_poll_secs as i64))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Byte budget for the client store (None = unlimited).
    pub quota_bytes: Option<u64>,
    pub busy_timeout_ms: u64,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            quota_bytes: Some(5 * 1024 * 1024),
            busy_timeout_ms: 2_000,
            wal_autocheckpoint: 1000,
        }
    }
}
