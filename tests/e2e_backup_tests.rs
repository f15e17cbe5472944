//! End-to-end tests for the backup scheduler
//!
//! Configs go through the same load/resolve path as the binary, commands run
//! under the real `/bin/bash` and artifacts land in the local object store.

mod common;

use common::{start_scheduler, wait_for_ticks, TestEnv};
use s3_backup_manager::backup::{CleanupPolicy, RunnerState, StorageBackend};
use std::time::Duration;

const TICK_TIMEOUT: Duration = Duration::from_secs(10);
const GRACE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_backup_is_uploaded_and_local_copy_deleted() {
    let env = TestEnv::new();
    let config = env.load_config(
        r#"
[backups.db]
interval = "1h"
path = "$WORK/{name}.sql"
commands = ["echo hello > {path}", "echo world >> {path}"]
"#,
    );

    let handle = start_scheduler(&config).await;
    let status = wait_for_ticks(&handle, "db", 1, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let tick = status.last_tick.unwrap();
    assert_eq!(tick.commands_total, 2);
    assert_eq!(tick.commands_failed, 0);
    assert!(tick.uploaded);
    assert_eq!(tick.cleanup, "deleted");

    let stored = std::fs::read_to_string(env.stored_object("db", "db.sql")).unwrap();
    assert_eq!(stored, "hello\nworld\n");
    assert!(!env.work_dir().join("db.sql").exists());
}

#[tokio::test]
async fn test_failed_command_does_not_stop_the_tick() {
    let env = TestEnv::new();
    let config = env.load_config(
        r#"
[backups.files]
interval = "1h"
path = "$WORK/{name}.txt"
commands = ["echo partial > {path}", "exit 3", "echo after >> {path}"]
"#,
    );

    let handle = start_scheduler(&config).await;
    let status = wait_for_ticks(&handle, "files", 1, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let tick = status.last_tick.unwrap();
    assert_eq!(tick.commands_total, 3);
    assert_eq!(tick.commands_failed, 1);
    assert!(tick.uploaded);

    let stored = std::fs::read_to_string(env.stored_object("files", "files.txt")).unwrap();
    assert_eq!(stored, "partial\nafter\n");
}

#[tokio::test]
async fn test_missing_artifact_keeps_runner_alive() {
    let env = TestEnv::new();
    let config = env.load_config(
        r#"
[backups.ghost]
interval = "50ms"
path = "$WORK/{name}.bin"
commands = ["true"]
"#,
    );

    let handle = start_scheduler(&config).await;
    let status = wait_for_ticks(&handle, "ghost", 2, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let tick = status.last_tick.unwrap();
    assert!(!tick.uploaded);
    assert_eq!(tick.cleanup, "missing");
    assert!(!env.stored_object("ghost", "ghost.bin").exists());
}

#[tokio::test]
async fn test_each_job_uploads_to_its_own_bucket() {
    let env = TestEnv::new();
    let config = env.load_config(
        r#"
[backups.alpha]
interval = "1h"
path = "$WORK/{name}.dump"
commands = ["echo a > {path}"]

[backups.beta]
interval = "1h"
path = "$WORK/{name}.dump"
commands = ["echo b > {path}"]
"#,
    );

    let handle = start_scheduler(&config).await;
    wait_for_ticks(&handle, "alpha", 1, TICK_TIMEOUT).await;
    wait_for_ticks(&handle, "beta", 1, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let alpha = std::fs::read_to_string(env.stored_object("alpha", "alpha.dump")).unwrap();
    let beta = std::fs::read_to_string(env.stored_object("beta", "beta.dump")).unwrap();
    assert_eq!(alpha, "a\n");
    assert_eq!(beta, "b\n");
}

#[tokio::test]
async fn test_timestamped_artifact_path() {
    let env = TestEnv::new();
    let config = env.load_config(
        r#"
[backups.snap]
interval = "1h"
path = "$WORK/{name}_{dt}.tar"
commands = ["echo data > {path}"]
"#,
    );

    let handle = start_scheduler(&config).await;
    let status = wait_for_ticks(&handle, "snap", 1, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let tick = status.last_tick.unwrap();
    let prefix = format!("{}/snap_", env.work_dir().display());
    assert!(tick.path.starts_with(&prefix), "unexpected path {}", tick.path);
    assert!(tick.path.ends_with(".tar"));
    // snap_YYYY-MM-DD_HH:MM:SS.tar
    let file_name = tick.path.rsplit('/').next().unwrap();
    assert_eq!(file_name.len(), "snap_".len() + 19 + ".tar".len());
    assert!(tick.uploaded);

    let stored: Vec<_> = std::fs::read_dir(env.store_root().join("snap"))
        .unwrap()
        .collect();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_keep_policy_retains_artifact_when_storage_is_broken() {
    let env = TestEnv::new();
    let mut config = env.load_config(
        r#"
cleanup = "keep_on_transfer_failure"

[backups.db]
interval = "1h"
path = "$WORK/{name}.sql"
commands = ["echo keep > {path}"]
"#,
    );
    assert_eq!(config.cleanup, CleanupPolicy::KeepOnTransferFailure);

    // A regular file as storage root makes every bucket unusable
    let bogus_root = env.dir.path().join("not-a-dir");
    std::fs::write(&bogus_root, b"").unwrap();
    config.storage = StorageBackend::Local { root: bogus_root };

    let handle = start_scheduler(&config).await;
    let status = wait_for_ticks(&handle, "db", 1, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let tick = status.last_tick.unwrap();
    assert!(!tick.uploaded);
    assert_eq!(tick.cleanup, "retained");
    let local = std::fs::read_to_string(env.work_dir().join("db.sql")).unwrap();
    assert_eq!(local, "keep\n");
}

#[tokio::test]
async fn test_shutdown_stops_every_runner() {
    let env = TestEnv::new();
    let config = env.load_config(
        r#"
[backups.one]
interval = "30ms"
path = "$WORK/{name}.out"
commands = ["echo 1 > {path}"]

[backups.two]
interval = "1day"
path = "$WORK/{name}.out"
commands = ["echo 2 > {path}"]
"#,
    );

    let handle = start_scheduler(&config).await;
    wait_for_ticks(&handle, "one", 2, TICK_TIMEOUT).await;
    wait_for_ticks(&handle, "two", 1, TICK_TIMEOUT).await;
    assert!(handle.shutdown(GRACE).await);

    let jobs = handle.list_jobs().await;
    assert_eq!(jobs.len(), 2);
    for job in jobs {
        assert_eq!(job.state, RunnerState::Stopped);
    }
    assert!(!handle.is_job_running("one").await);

    let ticks_at_shutdown = handle.get_job("one").await.unwrap().completed_ticks;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        handle.get_job("one").await.unwrap().completed_ticks,
        ticks_at_shutdown
    );
}
