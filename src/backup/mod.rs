//! Scheduled backup execution.
//!
//! Every configured job gets its own runner task ticking at the job's
//! interval. On each tick the runner takes the process-wide serialization
//! lock, expands the artifact path, runs the job's shell commands, uploads
//! the artifact and deletes the local copy.

mod handle;
mod job;
mod lock;
mod pipeline;
mod runner;
mod scheduler;
pub mod template;
mod transfer;

pub use handle::{JobStatus, SchedulerHandle, StatusBoard, TickSummary};
pub use job::{BackupJob, CleanupPolicy, RunnerState};
pub use lock::{LockObserver, SerializationGuard, SerializationLock};
pub use pipeline::{
    BashShell, CommandOutcome, CommandOutput, CommandPipeline, CommandStatus, PipelineReport,
    ShellError, ShellRunner, DEFAULT_SHELL,
};
pub use runner::{BackupJobRunner, CleanupOutcome, TickReport, TransferOutcome};
pub use scheduler::BackupScheduler;
pub use transfer::{
    artifact_key, ArtifactTransfer, ObjectStoreTransfer, StorageBackend, TransferError,
};
