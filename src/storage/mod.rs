pub mod blob;
pub mod config;
pub mod history;

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;

pub use blob::BlobStore;
pub use config::{Config, ConfigStorage, GeneralConfig, TomlConfigStorage};
pub use history::{HistoryStorage, JsonHistoryStorage, LoadOutcome};

/// Ensure XDG data and config directories exist
/// Returns (data_dir, config_dir)
///
/// XDG Base Directory Specification:
/// - Data: $XDG_DATA_HOME/clipstash (default: ~/.local/share/clipstash)
/// - Config: $XDG_CONFIG_HOME/clipstash (default: ~/.config/clipstash)
///
/// The data directory holds history.json, the images/ blob directory
/// and the watcher log file.
pub fn ensure_directories() -> Result<(PathBuf, PathBuf)> {
    let home = env::var("HOME").context("HOME environment variable not set")?;
    let home_path = PathBuf::from(home);

    // Get XDG data directory
    let data_dir = if let Ok(xdg_data) = env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("clipstash")
    } else {
        home_path.join(".local/share/clipstash")
    };

    // Get XDG config directory
    let config_dir = if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("clipstash")
    } else {
        home_path.join(".config/clipstash")
    };

    // Create data directory
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    // Create config directory
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

    log::debug!("Data directory: {:?}", data_dir);
    log::debug!("Config directory: {:?}", config_dir);

    Ok((data_dir, config_dir))
}
