use super::handle::{SchedulerHandle, StatusBoard};
use super::job::{BackupJob, CleanupPolicy};
use super::lock::{LockObserver, SerializationLock};
use super::pipeline::{CommandPipeline, ShellRunner};
use super::runner::BackupJobRunner;
use super::transfer::ArtifactTransfer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Launches one [`BackupJobRunner`] per configured job.
///
/// The scheduler owns the serialization lock and hands a clone of it to
/// every runner. Once started the runners are on their own.
pub struct BackupScheduler {
    jobs: Vec<Arc<BackupJob>>,
    lock: SerializationLock,
    pipeline: CommandPipeline,
    transfer: Arc<dyn ArtifactTransfer>,
    cleanup_policy: CleanupPolicy,
}

impl BackupScheduler {
    pub fn new(
        jobs: Vec<BackupJob>,
        shell: Arc<dyn ShellRunner>,
        transfer: Arc<dyn ArtifactTransfer>,
        cleanup_policy: CleanupPolicy,
    ) -> Self {
        Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            lock: SerializationLock::new(),
            pipeline: CommandPipeline::new(shell),
            transfer,
            cleanup_policy,
        }
    }

    /// Report every lock hold to `observer`.
    pub fn with_lock_observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.lock = SerializationLock::with_observer(observer);
        self
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawn all runners and return without waiting for them.
    pub async fn start(self, shutdown_token: CancellationToken) -> SchedulerHandle {
        info!("backup manager started with {} job(s)", self.jobs.len());

        let status = StatusBoard::new();
        let mut tasks = Vec::with_capacity(self.jobs.len());

        for job in &self.jobs {
            status.register(job).await;

            let runner = BackupJobRunner::new(
                Arc::clone(job),
                self.lock.clone(),
                self.pipeline.clone(),
                Arc::clone(&self.transfer),
                self.cleanup_policy,
            )
            .with_status(status.clone());

            tasks.push(tokio::spawn(runner.run(shutdown_token.child_token())));
        }

        SchedulerHandle::new(status, shutdown_token, tasks)
    }
}
