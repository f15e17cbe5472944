use super::job::{serialize_duration, BackupJob, RunnerState};
use super::runner::TickReport;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Condensed view of a finished tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    pub started_at: String,
    pub duration_ms: u64,
    pub path: String,
    pub commands_total: usize,
    pub commands_failed: usize,
    pub uploaded: bool,
    pub cleanup: String,
}

impl From<&TickReport> for TickSummary {
    fn from(report: &TickReport) -> Self {
        TickSummary {
            started_at: report.started_at.to_rfc3339(),
            duration_ms: report.elapsed.as_millis() as u64,
            path: report.resolved_path.clone(),
            commands_total: report.pipeline.outcomes.len(),
            commands_failed: report.pipeline.failed_count(),
            uploaded: report.transfer.is_uploaded(),
            cleanup: report.cleanup.to_string(),
        }
    }
}

/// Current status of one backup runner.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    #[serde(serialize_with = "serialize_duration")]
    pub interval: Duration,
    pub state: RunnerState,
    pub completed_ticks: u64,
    pub last_tick: Option<TickSummary>,
}

/// In-memory status table shared by the runners and the handle.
///
/// Nothing here survives a restart.
#[derive(Clone, Default)]
pub struct StatusBoard {
    jobs: Arc<RwLock<HashMap<String, JobStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job: &BackupJob) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            job.name.clone(),
            JobStatus {
                name: job.name.clone(),
                interval: job.interval,
                state: RunnerState::Idle,
                completed_ticks: 0,
                last_tick: None,
            },
        );
    }

    pub async fn set_state(&self, name: &str, state: RunnerState) {
        if let Some(status) = self.jobs.write().await.get_mut(name) {
            status.state = state;
        }
    }

    pub async fn record_tick(&self, report: &TickReport) {
        if let Some(status) = self.jobs.write().await.get_mut(&report.job_name) {
            status.completed_ticks += 1;
            status.last_tick = Some(TickSummary::from(report));
        }
    }

    pub async fn get(&self, name: &str) -> Option<JobStatus> {
        self.jobs.read().await.get(name).cloned()
    }

    /// All jobs, sorted by name.
    pub async fn snapshot(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

/// Handle to the running backup scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    status: StatusBoard,
    shutdown_token: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    pub fn new(
        status: StatusBoard,
        shutdown_token: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            status,
            shutdown_token,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    pub async fn job_count(&self) -> usize {
        self.status.len().await
    }

    pub async fn list_jobs(&self) -> Vec<JobStatus> {
        self.status.snapshot().await
    }

    pub async fn get_job(&self, name: &str) -> Option<JobStatus> {
        self.status.get(name).await
    }

    pub async fn is_job_running(&self, name: &str) -> bool {
        matches!(
            self.status.get(name).await,
            Some(JobStatus {
                state: RunnerState::Running,
                ..
            })
        )
    }

    /// Stop all runners.
    ///
    /// Runners waiting for a tick or for the lock stop right away; a runner in
    /// the middle of a tick finishes it first. Returns `false` if some runner
    /// was still busy when `grace` ran out; that runner is left behind.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Shutting down backup scheduler...");
        self.shutdown_token.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        match tokio::time::timeout(grace, futures::future::join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Backup runner task ended abnormally: {}", e);
                    }
                }
                info!("Backup scheduler shutdown complete");
                true
            }
            Err(_) => {
                warn!(
                    "Backup runners still busy after {:?}, abandoning them",
                    grace
                );
                false
            }
        }
    }
}
