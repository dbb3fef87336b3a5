//! Application configuration for retrace.
//!
//! User config lives at `~/.retrace/retrace.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "retrace.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".retrace";

// ---------------------------------------------------------------------------
// Config structs (matching retrace.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// History database settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the history database file. A leading `~/` expands to the
    /// user's home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.retrace/history.db".into()
}

impl StorageConfig {
    /// Resolve `db_path` to an absolute path, expanding a leading `~/`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => Ok(home_dir()?.join(rest)),
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| HistoryError::config("could not determine home directory"))
}

/// Get the path to the config directory (`~/.retrace/`).
pub fn config_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.retrace/retrace.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HistoryError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HistoryError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HistoryError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HistoryError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HistoryError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
