//! Reading and writing the TOML configuration file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::app_config::{AppConfig, CONFIG_FILE_NAME};

/// Errors raised while locating, reading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform reports no home directory to derive one from.
    #[error("no configuration directory for this platform")]
    NoConfigDir,
    /// Reading or writing the file failed.
    #[error("config file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration could not be rendered as TOML.
    #[error("config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Owns the configuration directory and the `config.toml` inside it.
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    /// Uses the platform configuration directory.
    ///
    /// # Errors
    /// Returns [`ConfigError::NoConfigDir`] when the platform has none.
    pub fn new() -> Result<Self, ConfigError> {
        AppConfig::default_config_dir()
            .map(|root| Self { root })
            .ok_or(ConfigError::NoConfigDir)
    }

    #[cfg(test)]
    pub(crate) fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the configuration directory if it does not exist yet.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if it cannot be created.
    pub fn ensure_config_dir(&self) -> Result<(), ConfigError> {
        if !self.root.is_dir() {
            debug!(path = %self.root.display(), "Creating configuration directory");
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Reads `path`, or `config.toml` in the configuration directory.
    ///
    /// A missing file is written out with defaults. A file that does not
    /// parse is kept as is and defaults are returned.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file exists but cannot be read, or the
    /// default file cannot be written.
    pub fn load_config(&self, path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        self.ensure_config_dir()?;
        let path = path.map_or_else(|| self.root.join(CONFIG_FILE_NAME), Path::to_path_buf);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "Writing default configuration");
                let config = AppConfig::default();
                Self::save_to_file(&path, &config)?;
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(toml::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Malformed configuration, using defaults");
            AppConfig::default()
        }))
    }

    /// Writes `data` through a sibling temporary file that replaces `path`
    /// in one rename.
    fn save_to_file<T: Serialize>(path: &Path, data: &T) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(data)?;
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(text.as_bytes())?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
