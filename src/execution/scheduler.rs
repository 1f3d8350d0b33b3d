//! Job scheduler - bounds how many jobs run at once

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One job at a time, in document order
    #[default]
    Sequential,

    /// Every job at once
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Number of jobs allowed to run concurrently
    pub fn concurrency(&self, job_count: usize) -> usize {
        let limit = match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => job_count,
            SchedulingStrategy::LimitedParallel(max) => (*max).min(job_count),
        };
        limit.max(1)
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::Sequential => write!(f, "sequential"),
            SchedulingStrategy::Parallel => write!(f, "parallel"),
            SchedulingStrategy::LimitedParallel(max) => write!(f, "{}", max),
        }
    }
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    /// Accepts `sequential`, `parallel` or a job count
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" | "seq" => Ok(SchedulingStrategy::Sequential),
            "parallel" | "all" => Ok(SchedulingStrategy::Parallel),
            other => match other.parse::<usize>() {
                Ok(0) => Err("job count must be at least 1".to_string()),
                Ok(1) => Ok(SchedulingStrategy::Sequential),
                Ok(n) => Ok(SchedulingStrategy::LimitedParallel(n)),
                Err(_) => Err(format!(
                    "unknown strategy '{}' (expected sequential, parallel or a number)",
                    s
                )),
            },
        }
    }
}

/// Hands out worker slots to job tasks
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    slots: Arc<Semaphore>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy, job_count: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(strategy.concurrency(job_count))),
        }
    }

    /// Wait for a free slot; the slot is released when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.slots.clone().acquire_owned().await
    }
}
