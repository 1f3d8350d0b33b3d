//! Step runner - executes a job's steps in order

use crate::{
    core::{EnvironmentSpec, Step, StepKind, StepResult},
    execution::command::CommandExecutor,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Cancellation signal for one job
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of running a job's steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Results of every executed step, in order
    pub results: Vec<StepResult>,

    /// The step that halted the run
    pub failed_step: Option<StepKind>,

    /// Whether the job was cancelled
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_step.is_none() && !self.cancelled
    }

    /// The result of a given step, if it ran
    pub fn result_for(&self, kind: StepKind) -> Option<&StepResult> {
        self.results.iter().find(|r| r.kind == kind)
    }

    pub fn executed(&self) -> Vec<StepKind> {
        self.results.iter().map(|r| r.kind).collect()
    }

    /// Human-readable failure reason
    pub fn failure_reason(&self) -> Option<String> {
        if self.cancelled {
            return Some("cancelled".to_string());
        }
        let failed = self.failed_step?;
        let result = self.result_for(failed)?;
        Some(if result.timed_out {
            format!("{} timed out after {}s", failed, result.duration.as_secs())
        } else {
            match result.exit_code {
                Some(code) => format!("{} exited with code {}", failed, code),
                None => format!("{} did not run: {}", failed, result.output.trim()),
            }
        })
    }
}

/// Callback invoked around each step
pub trait StepObserver: Send + Sync {
    fn step_started(&self, _kind: StepKind) {}
    fn step_finished(&self, _result: &StepResult) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl StepObserver for NoopObserver {}

/// Executes ordered steps, stopping at the first failure
pub struct StepRunner<E> {
    executor: Arc<E>,
    workdir: PathBuf,
}

impl<E: CommandExecutor> StepRunner<E> {
    pub fn new(executor: Arc<E>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            workdir: workdir.into(),
        }
    }

    /// Run steps sequentially.
    ///
    /// `skip_tests` removes test-phase steps before anything runs.
    pub async fn run(
        &self,
        steps: &[Step],
        env: &EnvironmentSpec,
        skip_tests: bool,
        cancel: &CancelToken,
        observer: &dyn StepObserver,
    ) -> RunOutcome {
        let process_env = env.to_process_env(std::env::var_os("PATH"));
        let mut outcome = RunOutcome::default();

        for step in steps.iter().filter(|s| !(skip_tests && s.kind.is_test_phase())) {
            if cancel.is_cancelled() {
                info!("Cancelled before step {}", step.kind);
                outcome.cancelled = true;
                return outcome;
            }

            observer.step_started(step.kind);
            let started = Instant::now();

            let execution = timeout(
                step.timeout,
                self.executor.execute(&step.command, &process_env, &self.workdir),
            );

            let result = tokio::select! {
                res = execution => match res {
                    Ok(Ok(output)) => StepResult {
                        kind: step.kind,
                        command: step.command.clone(),
                        exit_code: output.exit_code,
                        output: output.combined(),
                        duration: started.elapsed(),
                        timed_out: false,
                    },
                    Ok(Err(e)) => {
                        error!("Step {} could not run: {}", step.kind, e);
                        StepResult {
                            kind: step.kind,
                            command: step.command.clone(),
                            exit_code: None,
                            output: e.to_string(),
                            duration: started.elapsed(),
                            timed_out: false,
                        }
                    }
                    Err(_) => {
                        error!("Timeout for step {} after {}s", step.kind, step.timeout.as_secs());
                        StepResult {
                            kind: step.kind,
                            command: step.command.clone(),
                            exit_code: None,
                            output: format!("Timeout after {} seconds", step.timeout.as_secs()),
                            duration: started.elapsed(),
                            timed_out: true,
                        }
                    }
                },
                _ = cancel.cancelled() => {
                    info!("Step {} cancelled", step.kind);
                    outcome.cancelled = true;
                    return outcome;
                }
            };

            debug!("Step {} finished in {:?}", step.kind, result.duration);
            observer.step_finished(&result);

            let failed = !result.is_success();
            outcome.results.push(result);

            if failed {
                outcome.failed_step = Some(step.kind);
                return outcome;
            }
        }

        outcome
    }
}
