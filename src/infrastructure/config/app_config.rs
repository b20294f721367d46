//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::args::CliArgs;
use crate::infrastructure::image::{ImageLoaderConfig, default_cache_dir};

const APP_NAME: &str = "imgtier";
const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "imgtier";

pub(crate) const CONFIG_FILE_NAME: &str = "config.toml";

/// Platform directories for the application, when the platform has a home.
pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Storage root for the disk cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Image loader settings.
    #[serde(default)]
    pub loader: ImageLoaderConfig,
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(workers) = args.workers {
            self.loader.max_workers = workers;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().join(format!("{APP_NAME}.log")))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Returns effective disk cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::image::DiskFormat;
    use clap::Parser;

    #[test]
    fn test_parse_config_with_loader_section() {
        let toml_content = r#"
            log_level = "debug"
            cache_dir = "/var/cache/imgtier"

            [loader]
            memory_budget = 1048576
            max_workers = 2
            coalesce_in_flight = false
            disk_format = "jpeg"
            jpeg_quality = 85
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/imgtier")));
        assert_eq!(config.loader.memory_budget, Some(1_048_576));
        assert_eq!(config.loader.max_workers, 2);
        assert!(!config.loader.coalesce_in_flight);
        assert_eq!(config.loader.disk_format, DiskFormat::Jpeg);
        assert_eq!(config.loader.jpeg_quality, 85);
        // Unset keys keep their defaults.
        assert_eq!(config.loader.disk_budget, 10 * 1024 * 1024);
        assert_eq!(config.loader.key_digest, "sha256");
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.cache_dir, None);
        assert_eq!(config.loader.max_workers, 5);
        assert_eq!(config.loader.connect_timeout_secs, 5);
        assert!(config.loader.coalesce_in_flight);
        assert_eq!(config.loader.disk_format, DiskFormat::Source);
    }

    #[test]
    fn test_cli_flags_override_file_values() {
        let mut config: AppConfig = toml::from_str(
            r#"
            log_level = "warn"
            [loader]
            max_workers = 2
        "#,
        )
        .unwrap();
        let args = CliArgs::parse_from([
            "imgtier",
            "--log-level",
            "trace",
            "--workers",
            "8",
            "--cache-dir",
            "/tmp/imgtier-test",
            "stats",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.loader.max_workers, 8);
        assert_eq!(
            config.effective_cache_dir(),
            PathBuf::from("/tmp/imgtier-test")
        );
    }

    #[test]
    fn test_effective_cache_dir_falls_back_to_default() {
        let config = AppConfig::default();
        assert_eq!(config.effective_cache_dir(), default_cache_dir());
    }
}
