use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::migrate::MigrationPolicy;
use crate::store::DedupePolicy;

pub const CONFIG_FILE: &str = "config.json";

/// Where the per-user protection key lives.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    #[default]
    Keyring,
    File,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ImportConfig {
    pub dedupe_by_secret: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationConfig {
    pub replace_existing_destination: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            replace_existing_destination: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub key_source: KeySource,
    pub import: ImportConfig,
    pub migration: MigrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: 1,
            key_source: KeySource::default(),
            import: ImportConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Config {
    /// Read `config.json`; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    pub fn dedupe_policy(&self) -> DedupePolicy {
        if self.import.dedupe_by_secret {
            DedupePolicy::BySecret
        } else {
            DedupePolicy::Off
        }
    }

    pub fn migration_policy(&self) -> MigrationPolicy {
        MigrationPolicy {
            replace_existing_destination: self.migration.replace_existing_destination,
        }
    }
}

pub fn config_path(app_dir: &Path) -> PathBuf {
    app_dir.join(CONFIG_FILE)
}

pub fn save_config(cfg: &Config, path: &Path) -> Result<()> {
    let s = serde_json::to_string_pretty(cfg)?;
    std::fs::write(path, s)?;
    Ok(())
}
