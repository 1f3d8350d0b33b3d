//! Test: Cancellation - cancelling one job leaves its siblings alone

use crate::helpers::*;
use buildmatrix::core::{ExecutionStatus, JobState, StepKind};
use buildmatrix::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use buildmatrix::persistence::cache::{CacheKey, CacheManager, FsCacheStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MATRIX: &str = r#"
name: "engine"
matrix:
  - target: x86_64-unknown-linux-gnu
  - target: i686-unknown-linux-gnu
"#;

/// Test that cancelling a running job stops it and spares the other job
#[tokio::test]
async fn test_cancel_one_running_job() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(
        MockExecutor::new()
            .with_binaries(&["engine"])
            .delay_when(
                "x86_64-unknown-linux-gnu/stable cargo test --target",
                Duration::from_secs(10),
            ),
    );
    let store = FsCacheStore::new(dir.path().join("cache"));
    let engine = ExecutionEngine::new(executor.clone(), options(dir.path(), SchedulingStrategy::Parallel))
        .with_cache(CacheManager::new(store, "v1"));
    let events = record_events(&engine);
    let plan = plan_from(MATRIX);
    let trigger = commit();

    let (report, cancelled) = tokio::join!(engine.execute(&plan, &trigger), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.cancel(&job_id("x86_64-unknown-linux-gnu"))
    });
    let report = report.unwrap();
    assert!(cancelled);

    let target = report.job(&job_id("x86_64-unknown-linux-gnu")).unwrap();
    assert!(matches!(target.state, JobState::Cancelled { .. }));
    assert!(target.outcome.cancelled);
    // Steps that never started have no result
    assert_eq!(
        target.outcome.executed(),
        vec![
            StepKind::Install,
            StepKind::Build { release: false },
            StepKind::Build { release: true },
        ]
    );
    assert!(!executor
        .calls_for("x86_64-unknown-linux-gnu")
        .iter()
        .any(|c| c.starts_with("cargo test --release")));

    let sibling = report.job(&job_id("i686-unknown-linux-gnu")).unwrap();
    assert!(sibling.state.is_passed());
    assert_eq!(sibling.outcome.results.len(), 5);

    assert_eq!(report.run.cancelled_jobs, 1);
    assert_eq!(report.run.passed_jobs, 1);
    assert_eq!(report.run.status, ExecutionStatus::Cancelled);
    assert_eq!(report.exit_code(), 1);

    // A cancelled job never writes its cache
    let key = CacheKey::for_job("v1", &job_id("x86_64-unknown-linux-gnu"));
    assert!(!dir.path().join("cache").join(format!("{}.zip", key)).exists());
    let sibling_key = CacheKey::for_job("v1", &job_id("i686-unknown-linux-gnu"));
    assert!(dir.path().join("cache").join(format!("{}.zip", sibling_key)).exists());

    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::JobCancelled { job } if *job == job_id("x86_64-unknown-linux-gnu"))));
}

/// Test that a canceller stops every job of a running matrix
#[tokio::test]
async fn test_cancel_all_during_run() {
    let dir = TempDir::new().unwrap();
    let executor = MockExecutor::new().delay_when("cargo build --release", Duration::from_secs(10));
    let engine = ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Parallel));
    let canceller = engine.canceller();
    let plan = plan_from(MATRIX);
    let trigger = commit();

    let (report, _) = tokio::join!(engine.execute(&plan, &trigger), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel_all();
    });
    let report = report.unwrap();

    assert_eq!(report.run.cancelled_jobs, 2);
    assert_eq!(report.run.status, ExecutionStatus::Cancelled);
    for job in &report.jobs {
        assert!(job.release.is_none());
        assert!(!job.outcome.executed().contains(&StepKind::Test { release: false }));
    }
}

/// Test that cancelling a job unknown to the run reports false
#[tokio::test]
async fn test_cancel_unknown_job() {
    let dir = TempDir::new().unwrap();
    let engine = ExecutionEngine::new(
        MockExecutor::new(),
        options(dir.path(), SchedulingStrategy::Sequential),
    );

    engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();

    assert!(!engine.cancel(&job_id("aarch64-unknown-linux-gnu")));
}
