//! Persistence: per-job build caches and matrix run history

pub mod cache;
#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::execution::MatrixReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a matrix run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Matrix name
    pub matrix_name: String,

    /// What triggered the run, e.g. "tag v1.0.0"
    pub trigger: String,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,

    pub passed_jobs: usize,

    pub failed_jobs: usize,

    /// Archives uploaded during the run
    pub published: usize,

    pub exit_code: i32,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a matrix run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List all runs for a matrix, newest first
    async fn list_runs(&self, matrix_name: &str) -> Result<Vec<RunSummary>>;

    /// List all matrix names
    async fn list_matrices(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
    by_matrix: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        let is_new = runs.insert(run.run_id, run.clone()).is_none();

        if is_new {
            let mut by_matrix = self.by_matrix.write().await;
            by_matrix
                .entry(run.matrix_name.clone())
                .or_default()
                .push(run.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, matrix_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_matrix = self.by_matrix.read().await;

        let mut result: Vec<RunSummary> = by_matrix
            .get(matrix_name)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_matrices(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.by_matrix.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Create a summary from a finished run
pub fn create_summary(report: &MatrixReport) -> RunSummary {
    RunSummary {
        run_id: report.run.run_id,
        matrix_name: report.name.clone(),
        trigger: report.trigger.to_string(),
        status: report.run.status,
        started_at: report.run.started_at.unwrap_or_else(Utc::now),
        completed_at: report.run.completed_at,
        total_jobs: report.run.total_jobs,
        passed_jobs: report.run.passed_jobs,
        failed_jobs: report.run.failed_jobs + report.run.cancelled_jobs,
        published: report.published().len(),
        exit_code: report.exit_code(),
    }
}
