//! S3 Backup Manager Library
//!
//! Runs shell-driven backups on fixed intervals and ships the resulting
//! artifacts to object storage. Exposed as a library for the binary and
//! the integration tests.

pub mod backup;
pub mod config;

// Re-export commonly used types for convenience
pub use backup::{
    BackupJob, BackupScheduler, BashShell, CleanupPolicy, ObjectStoreTransfer, SchedulerHandle,
    StorageBackend,
};
pub use config::{AppConfig, CliConfig, FileConfig};
