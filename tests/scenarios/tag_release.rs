//! Test: Tag Release - tag pushes skip tests and publish release-channel jobs

use crate::helpers::*;
use buildmatrix::core::{ExecutionStatus, JobState, StepKind};
use buildmatrix::execution::{ExecutionEngine, ExecutionEvent, PublishOutcome, ReleaseReason, SchedulingStrategy};
use buildmatrix::persistence::cache::{CacheManager, FsCacheStore};
use buildmatrix::publish::{ArtifactPublisher, Credentials};
use std::sync::Arc;
use tempfile::TempDir;

const MATRIX: &str = r#"
name: "engine"
crate_name: "engine"
matrix:
  - target: x86_64-unknown-linux-gnu
  - target: x86_64-unknown-linux-gnu
    channel: nightly
    allow_failure: true
  - target: x86_64-pc-windows-gnu
    disable_tests: true
  - target: x86_64-unknown-linux-gnu
    cpu: haswell
    deploy: false
deploy:
  binaries: ["engine"]
  upload: "gh release upload {{ tag }} {{ artifact }}"
"#;

fn engine_with_host(
    dir: &TempDir,
    executor: Arc<MockExecutor>,
    host: Arc<MockReleaseHost>,
) -> ExecutionEngine<Arc<MockExecutor>> {
    let plan = plan_from(MATRIX);
    let publisher = ArtifactPublisher::new(
        plan.deploy.clone().unwrap(),
        dir.path().join("dist"),
        host,
    )
    .with_crate_name(plan.crate_name.clone())
    .with_workspace(dir.path());

    ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Parallel))
        .with_publisher(publisher)
}

/// Test that a tag push runs only install and the release build
#[tokio::test]
async fn test_tag_push_skips_test_phase() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let host = Arc::new(MockReleaseHost::new());
    let engine = engine_with_host(&dir, executor.clone(), host.clone())
        .with_credentials(Credentials::new("token"));

    let report = engine.execute(&plan_from(MATRIX), &tag("v1.2.0")).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    for job in &report.jobs {
        assert_eq!(
            job.outcome.executed(),
            vec![StepKind::Install, StepKind::Build { release: true }],
            "{}",
            job.job.id
        );
    }
    assert!(executor.calls().iter().all(|c| !c.command.starts_with("cargo test")));
}

/// Test that only stable, deploy-enabled jobs publish, once per target
#[tokio::test]
async fn test_tag_push_publishes_release_channel_jobs() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let host = Arc::new(MockReleaseHost::new());
    let engine = engine_with_host(&dir, executor, host.clone())
        .with_credentials(Credentials::new("token"));

    let report = engine.execute(&plan_from(MATRIX), &tag("v1.2.0")).await.unwrap();

    let mut uploaded: Vec<String> = host.uploads().iter().map(|u| u.target.clone()).collect();
    uploaded.sort();
    assert_eq!(uploaded, vec!["x86_64-pc-windows-gnu", "x86_64-unknown-linux-gnu"]);

    let uploads = host.uploads();
    let linux = uploads
        .iter()
        .find(|u| u.target == "x86_64-unknown-linux-gnu")
        .unwrap();
    assert_eq!(linux.tag, "v1.2.0");
    assert_eq!(
        linux.artifact,
        dir.path().join("dist/engine-v1.2.0-x86_64-unknown-linux-gnu.zip")
    );
    assert!(linux.artifact.exists());

    let nightly = report
        .jobs
        .iter()
        .find(|r| r.job.channel() == "nightly")
        .unwrap();
    assert_eq!(
        nightly.release.as_ref().unwrap().reason,
        ReleaseReason::NotReleaseChannel {
            channel: "nightly".to_string(),
            release_channel: "stable".to_string(),
        }
    );
    let haswell = report.jobs.iter().find(|r| r.job.cpu() == "haswell").unwrap();
    assert_eq!(
        haswell.release.as_ref().unwrap().reason,
        ReleaseReason::DeployDisabled
    );
    assert_eq!(report.published().len(), 2);
}

/// Test that an ordinary commit never publishes and runs every step
#[tokio::test]
async fn test_commit_never_publishes() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let host = Arc::new(MockReleaseHost::new());
    let engine = engine_with_host(&dir, executor, host.clone())
        .with_credentials(Credentials::new("token"));

    let report = engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();

    assert!(host.uploads().is_empty());
    assert_eq!(executed_steps(&report, "x86_64-pc-windows-gnu").len(), 3);
    for job in &report.jobs {
        assert_eq!(
            job.release.as_ref().unwrap().reason,
            ReleaseReason::NotTagPush
        );
        assert!(job.publish.is_none());
    }
}

/// Test that a failed upload is reported but does not fail the run
#[tokio::test]
async fn test_publish_failure_keeps_exit_code() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let host = Arc::new(MockReleaseHost::failing());
    let engine = engine_with_host(&dir, executor, host.clone())
        .with_credentials(Credentials::new("token"));
    let events = record_events(&engine);

    let report = engine.execute(&plan_from(MATRIX), &tag("v1.2.0")).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    // One attempt per archive, no retries
    assert_eq!(host.uploads().len(), 2);
    let failures = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::PublishFailed { .. }))
        .count();
    assert_eq!(failures, 2);
    assert!(report
        .jobs
        .iter()
        .any(|r| matches!(r.publish, Some(PublishOutcome::Failed(_)))));
}

/// Test that missing credentials fail publishing without uploading
#[tokio::test]
async fn test_missing_credentials() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let host = Arc::new(MockReleaseHost::new());
    let engine = engine_with_host(&dir, executor, host.clone());

    let report = engine.execute(&plan_from(MATRIX), &tag("v1.2.0")).await.unwrap();

    assert!(host.uploads().is_empty());
    assert_eq!(report.exit_code(), 0);
    let linux = report.job(&job_id("x86_64-unknown-linux-gnu")).unwrap();
    match &linux.publish {
        Some(PublishOutcome::Failed(error)) => assert!(error.contains("GITHUB_TOKEN")),
        other => panic!("expected publish failure, got {:?}", other),
    }
}

/// Test that a release job whose binary is missing reports the artifact
#[tokio::test]
async fn test_missing_binary() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new());
    let host = Arc::new(MockReleaseHost::new());
    let engine = engine_with_host(&dir, executor, host.clone())
        .with_credentials(Credentials::new("token"));

    let report = engine.execute(&plan_from(MATRIX), &tag("v1.2.0")).await.unwrap();

    assert!(host.uploads().is_empty());
    let windows = report.job(&job_id("x86_64-pc-windows-gnu")).unwrap();
    match &windows.publish {
        Some(PublishOutcome::Failed(error)) => {
            assert!(error.contains("engine.exe"), "unexpected error: {}", error)
        }
        other => panic!("expected publish failure, got {:?}", other),
    }
}

/// Test that a job cancelled after its last step neither publishes nor caches
#[tokio::test]
async fn test_cancel_after_release_build_skips_publish() {
    let yaml = r#"
name: "engine"
matrix:
  - target: x86_64-unknown-linux-gnu
deploy:
  binaries: ["engine"]
  upload: "gh release upload {{ tag }} {{ artifact }}"
"#;
    let dir = TempDir::new().unwrap();
    let plan = plan_from(yaml);
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let host = Arc::new(MockReleaseHost::new());
    let publisher = ArtifactPublisher::new(
        plan.deploy.clone().unwrap(),
        dir.path().join("dist"),
        host.clone(),
    )
    .with_crate_name(plan.crate_name.clone());
    let store = FsCacheStore::new(dir.path().join("cache"));
    let engine = ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Sequential))
        .with_publisher(publisher)
        .with_cache(CacheManager::new(store, "v1"))
        .with_credentials(Credentials::new("token"));

    let canceller = engine.canceller();
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::StepFinished { result, .. } = &event {
            if result.kind == (StepKind::Build { release: true }) {
                canceller.cancel_all();
            }
        }
    });

    let report = engine.execute(&plan, &tag("v1.2.0")).await.unwrap();

    assert!(host.uploads().is_empty());
    assert!(!dir.path().join("dist").exists());
    assert!(!dir.path().join("cache").exists());

    let job = report.job(&job_id("x86_64-unknown-linux-gnu")).unwrap();
    assert!(matches!(job.state, JobState::Cancelled { .. }));
    assert!(job.outcome.cancelled);
    assert!(job.release.is_none());
    assert!(job.publish.is_none());
    assert_eq!(report.run.status, ExecutionStatus::Cancelled);
}
