pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod journaling;
pub mod remote;
pub mod session;
pub mod storage;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
