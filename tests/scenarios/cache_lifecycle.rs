//! Test: Cache Lifecycle - caches are saved for passing jobs and restored later

use crate::helpers::*;
use buildmatrix::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use buildmatrix::persistence::cache::{CacheKey, CacheManager, FsCacheStore};
use std::sync::Arc;
use tempfile::TempDir;

const MATRIX: &str = r#"
name: "engine"
matrix:
  - target: x86_64-unknown-linux-gnu
  - target: i686-unknown-linux-gnu
cache:
  version: "v3"
"#;

fn cached_engine(
    dir: &TempDir,
    executor: Arc<MockExecutor>,
) -> ExecutionEngine<Arc<MockExecutor>> {
    let store = FsCacheStore::new(dir.path().join("cache"));
    ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Parallel))
        .with_cache(CacheManager::new(store, "v3"))
}

fn entry(dir: &TempDir, target: &str) -> std::path::PathBuf {
    let key = CacheKey::for_job("v3", &job_id(target));
    dir.path().join("cache").join(format!("{}.zip", key))
}

/// Test that passing jobs save and failing jobs do not
#[tokio::test]
async fn test_cache_saved_only_for_passing_jobs() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(
        MockExecutor::new()
            .with_binaries(&["engine"])
            .fail_when("i686-unknown-linux-gnu/stable cargo test --release", 101),
    );
    let engine = cached_engine(&dir, executor);
    let events = record_events(&engine);

    let report = engine.execute(&plan_from(MATRIX), &commit()).await.unwrap();
    assert_eq!(report.exit_code(), 1);

    assert!(entry(&dir, "x86_64-unknown-linux-gnu").exists());
    assert!(!entry(&dir, "i686-unknown-linux-gnu").exists());

    let saved: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::CacheSaved { job, key } => Some((job.clone(), key.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, job_id("x86_64-unknown-linux-gnu"));
    assert!(saved[0].1.starts_with("v3-"));
}

/// Test that a second run restores what the first one saved
#[tokio::test]
async fn test_second_run_restores_cache() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let plan = plan_from(MATRIX);

    let first = cached_engine(&dir, executor.clone());
    let first_events = record_events(&first);
    first.execute(&plan, &commit()).await.unwrap();
    assert!(!first_events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheRestored { .. })));

    // Wipe the build output so only the cache can bring it back
    std::fs::remove_dir_all(dir.path().join("build")).unwrap();

    let second = cached_engine(&dir, executor);
    let second_events = record_events(&second);
    let report = second.execute(&plan, &commit()).await.unwrap();
    assert_eq!(report.exit_code(), 0);

    let restored: Vec<_> = second_events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::CacheRestored { job, files } => Some((job.clone(), *files)),
            _ => None,
        })
        .collect();
    assert_eq!(restored.len(), 2);
    assert!(restored.iter().all(|(_, files)| *files == 1));
}

/// Test that entries written under one cache version are not read by another
#[tokio::test]
async fn test_version_bump_invalidates_entries() {
    let dir = TempDir::new().unwrap();
    let executor = Arc::new(MockExecutor::new().with_binaries(&["engine"]));
    let plan = plan_from(MATRIX);

    cached_engine(&dir, executor.clone())
        .execute(&plan, &commit())
        .await
        .unwrap();

    let bumped = ExecutionEngine::new(executor, options(dir.path(), SchedulingStrategy::Parallel))
        .with_cache(CacheManager::new(FsCacheStore::new(dir.path().join("cache")), "v4"));
    let events = record_events(&bumped);
    bumped.execute(&plan, &commit()).await.unwrap();

    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::CacheRestored { .. })));
}
