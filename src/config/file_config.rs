use crate::backup::CleanupPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the file looked up when the config path is a directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub logging_level: Option<String>,
    pub shell: Option<String>,
    pub cleanup: Option<CleanupPolicy>,
    pub shutdown_grace_secs: Option<u64>,

    pub storage: Option<StorageConfig>,

    /// One table per backup, keyed by backup name.
    pub backups: BTreeMap<String, BackupConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// "s3" (default) or "local"
    pub kind: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub allow_http: Option<bool>,
    /// Root directory for the "local" backend.
    pub root: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Human readable duration, e.g. "30m" or "1day 12h".
    pub interval: String,
    pub path: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl FileConfig {
    /// Load from a file, or from `config.toml` inside a directory.
    pub fn load(path: &Path) -> Result<Self> {
        let file_path: PathBuf = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {:?}", file_path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", file_path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
