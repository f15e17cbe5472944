//! Common test infrastructure
//!
//! Every test gets its own temporary directory with a `work/` directory for
//! artifacts and a `store/` directory backing the local object store.
//! Config snippets may use `$WORK` as a placeholder for the work directory.

#![allow(dead_code)]

use s3_backup_manager::backup::{
    BackupScheduler, BashShell, JobStatus, ObjectStoreTransfer, SchedulerHandle,
};
use s3_backup_manager::config::{AppConfig, CliConfig, FileConfig, CONFIG_FILE_NAME};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const WORK_PLACEHOLDER: &str = "$WORK";

pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        std::fs::create_dir_all(dir.path().join("store")).unwrap();
        Self { dir }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn store_root(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Path of an object uploaded to the local store.
    pub fn stored_object(&self, bucket: &str, key: &str) -> PathBuf {
        self.store_root().join(bucket).join(key)
    }

    /// Write a config using local storage plus the given backup tables.
    /// Returns the directory holding `config.toml`.
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let content = format!(
            "[storage]\nkind = \"local\"\nroot = '{}'\n\n{}",
            self.store_root().display(),
            extra.replace(WORK_PLACEHOLDER, &self.work_dir().display().to_string()),
        );
        let config_dir = self.dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CONFIG_FILE_NAME), content).unwrap();
        config_dir
    }

    pub fn load_config(&self, extra: &str) -> AppConfig {
        let config_dir = self.write_config(extra);
        let file_config = FileConfig::load(&config_dir).unwrap();
        AppConfig::resolve(&CliConfig::default(), file_config).unwrap()
    }
}

/// Start a scheduler wired the same way as the binary.
pub async fn start_scheduler(config: &AppConfig) -> SchedulerHandle {
    let transfer = Arc::new(ObjectStoreTransfer::new(config.storage.clone()));
    let shell = Arc::new(BashShell::new(config.shell.clone()));
    BackupScheduler::new(config.backups.clone(), shell, transfer, config.cleanup)
        .start(CancellationToken::new())
        .await
}

/// Poll until `name` has completed at least `ticks` ticks.
pub async fn wait_for_ticks(
    handle: &SchedulerHandle,
    name: &str,
    ticks: u64,
    timeout: Duration,
) -> JobStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = handle.get_job(name).await.unwrap();
        if status.completed_ticks >= ticks {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} completed {} tick(s), expected {}",
                name, status.completed_ticks, ticks
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
