use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Clipboard polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of decoded images held in memory
    #[serde(default = "default_image_cache_entries")]
    pub image_cache_entries: usize,

    /// Decoded-byte budget for the image cache
    #[serde(default = "default_image_cache_cost_bytes")]
    pub image_cache_cost_bytes: usize,

    /// Our own application identifier; clipboard changes made while
    /// an app with this id is frontmost are ignored
    #[serde(default)]
    pub self_bundle_id: Option<String>,

    /// Log level for the watcher log file (error|warn|info|debug|trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            poll_interval_ms: default_poll_interval_ms(),
            image_cache_entries: default_image_cache_entries(),
            image_cache_cost_bytes: default_image_cache_cost_bytes(),
            self_bundle_id: None,
            log_level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_poll_interval_ms() -> u64 {
    500
}

fn default_image_cache_entries() -> usize {
    100
}

fn default_image_cache_cost_bytes() -> usize {
    268_435_456 // 256MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Trait for configuration storage
pub trait ConfigStorage: Send + Sync {
    /// Load configuration from file
    fn load(&self) -> Result<Config>;

    /// Save configuration to file
    fn save(&self, config: &Config) -> Result<()>;

    /// Get the config file path
    fn path(&self) -> &PathBuf;

    /// Create default configuration file if it doesn't exist
    fn create_default(&self) -> Result<()>;
}

/// TOML-based implementation of ConfigStorage
pub struct TomlConfigStorage {
    path: PathBuf,
}

impl TomlConfigStorage {
    /// Create a new TomlConfigStorage with the given path
    pub fn new(path: PathBuf) -> Self {
        TomlConfigStorage { path }
    }
}

impl ConfigStorage for TomlConfigStorage {
    fn load(&self) -> Result<Config> {
        use anyhow::Context;
        use std::fs;

        // If file doesn't exist, create default and return it
        if !self.path.exists() {
            log::info!(
                "Config file not found at {:?}, creating default configuration",
                self.path
            );
            self.create_default()?;
            return Ok(Config::default());
        }

        // Read and parse TOML
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config from {:?}", self.path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", self.path))?;

        log::info!("Loaded configuration from {:?}", self.path);
        log::debug!(
            "Config: poll_interval_ms={}, image_cache_entries={}",
            config.general.poll_interval_ms,
            config.general.image_cache_entries
        );

        Ok(config)
    }

    fn save(&self, config: &Config) -> Result<()> {
        use anyhow::Context;
        use std::fs;

        // Serialize to TOML
        let toml_str =
            toml::to_string_pretty(config).with_context(|| "Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        // Write to file
        fs::write(&self.path, toml_str)
            .with_context(|| format!("Failed to write config to {:?}", self.path))?;

        log::debug!("Saved configuration to {:?}", self.path);

        Ok(())
    }

    fn path(&self) -> &PathBuf {
        &self.path
    }

    fn create_default(&self) -> Result<()> {
        self.save(&Config::default())
    }
}
