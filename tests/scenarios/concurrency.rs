//! Test: Concurrency - scheduling strategies bound how many jobs run at once

use crate::helpers::*;
use buildmatrix::execution::{ExecutionEngine, SchedulingStrategy};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MATRIX: &str = r#"
name: "engine"
matrix:
  - target: x86_64-unknown-linux-gnu
  - target: i686-unknown-linux-gnu
  - target: x86_64-apple-darwin
  - target: aarch64-unknown-linux-gnu
"#;

const TARGETS: [&str; 4] = [
    "x86_64-unknown-linux-gnu",
    "i686-unknown-linux-gnu",
    "x86_64-apple-darwin",
    "aarch64-unknown-linux-gnu",
];

fn slow_executor() -> Arc<MockExecutor> {
    Arc::new(MockExecutor::new().delay_when("/stable", Duration::from_millis(30)))
}

async fn run_with(strategy: SchedulingStrategy) -> (Arc<MockExecutor>, Vec<String>) {
    let dir = TempDir::new().unwrap();
    let executor = slow_executor();
    let engine = ExecutionEngine::new(executor.clone(), options(dir.path(), strategy));

    let report = engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.run.passed_jobs, 4);

    let order = report
        .jobs
        .iter()
        .map(|r| r.job.target().to_string())
        .collect();
    (executor, order)
}

/// Test that a limited pool never exceeds its slot count
#[tokio::test]
async fn test_limited_parallel_bounds_running_jobs() {
    let (executor, order) = run_with(SchedulingStrategy::LimitedParallel(2)).await;

    assert_eq!(executor.max_running(), 2);
    assert_eq!(order, TARGETS);
}

/// Test that sequential runs go row by row
#[tokio::test]
async fn test_sequential_runs_one_job_at_a_time() {
    let (executor, order) = run_with(SchedulingStrategy::Sequential).await;

    assert_eq!(executor.max_running(), 1);
    assert_eq!(order, TARGETS);

    // Every command of a row runs before the next row starts
    let mut targets: Vec<String> = executor.calls().iter().map(|c| c.target().to_string()).collect();
    targets.dedup();
    assert_eq!(targets, TARGETS);
}

/// Test that a parallel run starts every job and still reports in document order
#[tokio::test]
async fn test_parallel_reports_in_document_order() {
    let (executor, order) = run_with(SchedulingStrategy::Parallel).await;

    assert_eq!(executor.max_running(), 4);
    assert_eq!(order, TARGETS);
    assert_eq!(executor.calls().len(), 20);
}
