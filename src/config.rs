use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::analyzer::Configuration;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Rows per storage chunk for newly created stores.
    pub chunk_size: usize,
    /// Default number of passes for `shuffle`.
    pub shuffle_passes: usize,
    /// Feature extraction parameters.
    pub features: Configuration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            chunk_size: 1024,
            shuffle_passes: 1,
            features: Configuration::default(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/featurebank/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.features.validate()?;
        if config.chunk_size == 0 {
            anyhow::bail!("chunk_size must be at least 1");
        }
        Ok(config)
    }

    /// Database path: explicit override, then config file, then XDG default.
    pub fn resolve_db_path(&self, cli_override: Option<PathBuf>) -> PathBuf {
        cli_override
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(default_db_path)
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("featurebank.db")
    } else {
        // Fallback: current directory
        PathBuf::from("featurebank.db")
    }
}
