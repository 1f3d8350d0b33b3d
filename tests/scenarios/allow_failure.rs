//! Test: Allow Failure - optional rows never fail the run

use crate::helpers::*;
use buildmatrix::core::{ExecutionStatus, JobState, StepKind};
use buildmatrix::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use std::sync::Arc;
use tempfile::TempDir;

const MATRIX: &str = r#"
name: "engine"
matrix:
  - target: x86_64-unknown-linux-gnu
  - target: x86_64-unknown-linux-gnu
    channel: nightly
    allow_failure: true
  - target: x86_64-pc-windows-gnu
    disable_tests: true
"#;

/// Test that a failing allow_failure row keeps the exit code at zero
#[tokio::test]
async fn test_nightly_failure_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let executor = MockExecutor::new().fail_when("x86_64-unknown-linux-gnu/nightly cargo build", 101);
    let engine = ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Parallel));
    let events = record_events(&engine);

    let report = engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.run.status, ExecutionStatus::Completed);
    assert_eq!(report.run.passed_jobs, 2);
    assert_eq!(report.run.failed_jobs, 1);

    let nightly = report
        .jobs
        .iter()
        .find(|r| r.job.channel() == "nightly")
        .unwrap();
    assert!(matches!(nightly.state, JobState::Failed { .. }));
    assert!(!nightly.is_blocking_failure());

    let allowed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::JobFailed { allow_failure: true, .. }))
        .count();
    assert_eq!(allowed, 1);
}

/// Test that a failure in a required row still fails the run
#[tokio::test]
async fn test_required_failure_beside_allowed_failure() {
    let dir = TempDir::new().unwrap();
    let executor = MockExecutor::new()
        .fail_when("x86_64-unknown-linux-gnu/nightly cargo test", 101)
        .fail_when("x86_64-pc-windows-gnu/stable cargo build --release", 101);
    let engine = ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Sequential));

    let report = engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();

    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.run.status, ExecutionStatus::Failed);
    assert_eq!(report.run.failed_jobs, 2);
}

/// Test that disable_tests rows build but never test
#[tokio::test]
async fn test_disable_tests_skips_test_steps() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new());
    let engine = ExecutionEngine::new(executor.clone(), options(dir.path(), SchedulingStrategy::Sequential));

    let report = engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();

    assert_eq!(
        executed_steps(&report, "x86_64-pc-windows-gnu"),
        vec![
            StepKind::Install,
            StepKind::Build { release: false },
            StepKind::Build { release: true },
        ]
    );
    assert!(executor
        .calls_for("x86_64-pc-windows-gnu")
        .iter()
        .all(|c| !c.starts_with("cargo test")));
    assert!(report
        .job(&job_id("x86_64-pc-windows-gnu"))
        .unwrap()
        .state
        .is_passed());
}
