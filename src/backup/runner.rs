//! Per-job timer loop and the execute -> transfer -> cleanup sequence.

use super::handle::StatusBoard;
use super::job::{BackupJob, CleanupPolicy, RunnerState};
use super::lock::SerializationLock;
use super::pipeline::{CommandPipeline, PipelineReport};
use super::template::expand_path;
use super::transfer::{artifact_key, ArtifactTransfer};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded { bucket: String, key: String },
    Failed { error: String },
}

impl TransferOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, TransferOutcome::Uploaded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    /// Nothing was at the artifact path.
    Missing,
    /// Kept on disk because the upload failed and the policy says so.
    Retained,
    Failed(String),
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupOutcome::Deleted => write!(f, "deleted"),
            CleanupOutcome::Missing => write!(f, "missing"),
            CleanupOutcome::Retained => write!(f, "retained"),
            CleanupOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Everything that happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub job_name: String,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub resolved_path: String,
    pub pipeline: PipelineReport,
    pub transfer: TransferOutcome,
    pub cleanup: CleanupOutcome,
}

/// Drives one backup job for the lifetime of the process.
pub struct BackupJobRunner {
    job: Arc<BackupJob>,
    lock: SerializationLock,
    pipeline: CommandPipeline,
    transfer: Arc<dyn ArtifactTransfer>,
    cleanup_policy: CleanupPolicy,
    status: Option<StatusBoard>,
}

impl BackupJobRunner {
    pub fn new(
        job: Arc<BackupJob>,
        lock: SerializationLock,
        pipeline: CommandPipeline,
        transfer: Arc<dyn ArtifactTransfer>,
        cleanup_policy: CleanupPolicy,
    ) -> Self {
        Self {
            job,
            lock,
            pipeline,
            transfer,
            cleanup_policy,
            status: None,
        }
    }

    /// Publish state changes and tick summaries to `status`.
    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    /// Tick loop. Returns once `cancel` fires while the runner is idle.
    ///
    /// The first tick fires immediately; afterwards ticks follow the job
    /// interval measured from launch. A slow tick delays the next one and
    /// missed ticks are not caught up. Cancellation is observed while waiting
    /// for a tick or for the lock, never in the middle of a tick.
    pub async fn run(self, cancel: CancellationToken) {
        let span = info_span!(
            "backup",
            backup_name = %self.job.name,
            interval = ?self.job.interval
        );
        self.run_loop(cancel).instrument(span).await
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        if self.job.interval.is_zero() {
            error!("backup interval must be positive, runner not started");
            self.set_state(RunnerState::Stopped).await;
            return;
        }

        info!("starting backup runner...");

        let mut ticker = tokio::time::interval(self.job.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("running backup...");

            let guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                guard = self.lock.acquire(&self.job.name) => guard,
            };

            self.set_state(RunnerState::Running).await;
            let report = self.execute_tick(Local::now()).await;
            drop(guard);

            if let Some(status) = &self.status {
                status.record_tick(&report).await;
            }
            self.set_state(RunnerState::Idle).await;
        }

        self.set_state(RunnerState::Stopped).await;
        info!("backup runner stopped");
    }

    /// Run a single tick right now, waiting for the lock if needed.
    pub async fn run_tick(&self) -> TickReport {
        let _guard = self.lock.acquire(&self.job.name).await;
        self.execute_tick(Local::now()).await
    }

    /// The critical section. Caller must hold the serialization lock.
    async fn execute_tick(&self, started_at: DateTime<Local>) -> TickReport {
        let start = Instant::now();
        let resolved_path = expand_path(&self.job.path_template, &self.job.name, &started_at);

        let pipeline = self
            .pipeline
            .execute(&self.job.commands, &resolved_path)
            .await;

        let transfer = self.transfer_artifact(&resolved_path).await;
        let cleanup = self.cleanup_artifact(&resolved_path, &transfer).await;

        let report = TickReport {
            job_name: self.job.name.clone(),
            started_at,
            elapsed: start.elapsed(),
            resolved_path,
            pipeline,
            transfer,
            cleanup,
        };

        info!(
            path = %report.resolved_path,
            commands_failed = report.pipeline.failed_count(),
            uploaded = report.transfer.is_uploaded(),
            cleanup = %report.cleanup,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "backup finished"
        );

        report
    }

    async fn transfer_artifact(&self, resolved_path: &str) -> TransferOutcome {
        let bucket = &self.job.name;
        let result = match artifact_key(resolved_path) {
            Ok(key) => {
                let uploaded = self
                    .transfer
                    .upload(bucket, &key, Path::new(resolved_path))
                    .await;
                uploaded.map(|()| key)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(key) => TransferOutcome::Uploaded {
                bucket: bucket.clone(),
                key,
            },
            Err(e) => {
                error!(path = %resolved_path, "artifact upload failed: {}", e);
                TransferOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn cleanup_artifact(
        &self,
        resolved_path: &str,
        transfer: &TransferOutcome,
    ) -> CleanupOutcome {
        if !transfer.is_uploaded() {
            match self.cleanup_policy {
                CleanupPolicy::KeepOnTransferFailure => {
                    warn!(path = %resolved_path, "upload failed, keeping local artifact");
                    return CleanupOutcome::Retained;
                }
                CleanupPolicy::Always => {
                    warn!(
                        path = %resolved_path,
                        "upload failed, deleting local artifact anyway; no remote copy exists"
                    );
                }
            }
        }

        match tokio::fs::remove_file(resolved_path).await {
            Ok(()) => {
                debug!(path = %resolved_path, "local artifact deleted");
                CleanupOutcome::Deleted
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %resolved_path, "no local artifact to delete");
                CleanupOutcome::Missing
            }
            Err(e) => {
                error!(path = %resolved_path, "failed to delete local artifact: {}", e);
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }

    async fn set_state(&self, state: RunnerState) {
        if let Some(status) = &self.status {
            status.set_state(&self.job.name, state).await;
        }
    }
}
