mod file_config;

pub use file_config::{BackupConfig, FileConfig, StorageConfig, CONFIG_FILE_NAME};

use crate::backup::{BackupJob, CleanupPolicy, StorageBackend, DEFAULT_SHELL};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::warn;

pub const DEFAULT_LOGGING_LEVEL: &str = "info";
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// CLI arguments that can be used for config resolution.
/// TOML values take precedence over these.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub logging_level: String,
    pub shell: String,
    pub shutdown_grace_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            logging_level: DEFAULT_LOGGING_LEVEL.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub logging_level: String,
    pub shell: String,
    pub cleanup: CleanupPolicy,
    pub shutdown_grace_secs: u64,
    pub storage: StorageBackend,
    /// Sorted by name; names are unique since they are TOML table keys.
    pub backups: Vec<BackupJob>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and the TOML file.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file: FileConfig) -> Result<Self> {
        let logging_level = file
            .logging_level
            .unwrap_or_else(|| cli.logging_level.clone());
        if parse_logging_level(&logging_level).is_none() {
            bail!("Invalid logging_level: {:?}", logging_level);
        }

        let shell = file.shell.unwrap_or_else(|| cli.shell.clone());
        if shell.trim().is_empty() {
            bail!("shell must not be empty");
        }

        let cleanup = file.cleanup.unwrap_or_default();
        let shutdown_grace_secs = file
            .shutdown_grace_secs
            .unwrap_or(cli.shutdown_grace_secs);

        let storage = resolve_storage(file.storage.unwrap_or_default())?;

        if file.backups.is_empty() {
            bail!("No backups configured, add at least one [backups.<name>] table");
        }

        let backups = file
            .backups
            .into_iter()
            .map(|(name, backup)| resolve_backup(name, backup))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            logging_level,
            shell,
            cleanup,
            shutdown_grace_secs,
            storage,
            backups,
        })
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn resolve_storage(storage: StorageConfig) -> Result<StorageBackend> {
    let kind = storage.kind.as_deref().unwrap_or("s3");
    match kind {
        "s3" => Ok(StorageBackend::S3 {
            region: storage
                .region
                .unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
            endpoint: storage.endpoint.filter(|e| !e.trim().is_empty()),
            allow_http: storage.allow_http.unwrap_or(false),
        }),
        "local" => {
            let root = storage
                .root
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("storage.root must be set for local storage"))?;
            Ok(StorageBackend::Local { root })
        }
        other => bail!("Unknown storage kind: {:?} (expected \"s3\" or \"local\")", other),
    }
}

fn resolve_backup(name: String, backup: BackupConfig) -> Result<BackupJob> {
    if name.trim().is_empty() {
        bail!("Backup name must not be empty");
    }
    if name.contains('/') {
        bail!("Backup name {:?} must not contain '/'", name);
    }

    let interval = humantime::parse_duration(&backup.interval)
        .with_context(|| format!("Invalid interval for backup {:?}", name))?;
    if interval.is_zero() {
        bail!("Interval for backup {:?} must be positive", name);
    }

    if backup.path.trim().is_empty() {
        bail!("Path for backup {:?} must not be empty", name);
    }

    if backup.commands.is_empty() {
        warn!("Backup {:?} has no commands, it will only upload {}", name, backup.path);
    }

    Ok(BackupJob::new(name, interval, backup.path, backup.commands))
}

/// Parse a level name such as `info` or `DEBUG`.
pub fn parse_logging_level(s: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(s.trim()).ok()
}
