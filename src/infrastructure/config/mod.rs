//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, LogLevel};
pub(crate) use app_config::project_dirs;
pub use args::{CliArgs, Command};
pub use storage::{ConfigError, StorageManager};
