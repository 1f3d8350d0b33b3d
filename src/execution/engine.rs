//! Main execution engine - orchestrates a whole matrix run

use crate::{
    core::{
        EnvironmentSpec, ExecutionStatus, Job, JobId, JobState, MatrixPlan, RunState, Step,
        StepKind, StepResult, Trigger,
    },
    execution::{
        command::CommandExecutor,
        release::{ReleaseDecision, ReleaseGate, ReleaseReason},
        runner::{CancelToken, RunOutcome, StepObserver, StepRunner},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
    persistence::cache::CacheManager,
    publish::{ArtifactPublisher, Credentials, PublishResult},
};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a matrix run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        matrix: String,
        jobs: usize,
    },
    RunSkipped {
        run_id: Uuid,
        ref_name: Option<String>,
    },
    JobStarted {
        job: JobId,
        name: String,
    },
    CacheRestored {
        job: JobId,
        files: usize,
    },
    StepStarted {
        job: JobId,
        step: StepKind,
    },
    StepFinished {
        job: JobId,
        result: StepResult,
    },
    JobPassed {
        job: JobId,
    },
    JobFailed {
        job: JobId,
        step: StepKind,
        error: String,
        allow_failure: bool,
    },
    JobCancelled {
        job: JobId,
    },
    ReleaseSkipped {
        job: JobId,
        reason: ReleaseReason,
    },
    Published {
        job: JobId,
        result: PublishResult,
    },
    PublishFailed {
        job: JobId,
        error: String,
    },
    CacheSaved {
        job: JobId,
        key: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Where and how jobs run
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Parent of every job's build directory
    pub build_root: PathBuf,

    /// Working directory for step commands
    pub workspace: PathBuf,

    pub strategy: SchedulingStrategy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("target/matrix"),
            workspace: PathBuf::from("."),
            strategy: SchedulingStrategy::default(),
        }
    }
}

/// Publish result of a release-eligible job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishOutcome {
    Published(PublishResult),
    Failed(String),
}

/// Everything that happened to one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job: Job,
    pub state: JobState,
    pub outcome: RunOutcome,
    /// Present only for jobs whose steps all succeeded
    pub release: Option<ReleaseDecision>,
    pub publish: Option<PublishOutcome>,
}

impl JobReport {
    /// A failure that fails the whole run
    pub fn is_blocking_failure(&self) -> bool {
        !self.state.is_passed() && !self.job.allow_failure
    }
}

/// Result of a matrix run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub name: String,
    pub trigger: Trigger,
    pub run: RunState,
    /// Job reports in document order
    pub jobs: Vec<JobReport>,
}

impl MatrixReport {
    /// 0 iff every job without `allow_failure` built and tested.
    ///
    /// Publish failures never change the exit code.
    pub fn exit_code(&self) -> i32 {
        if self.jobs.iter().any(JobReport::is_blocking_failure) {
            1
        } else {
            0
        }
    }

    pub fn job(&self, id: &JobId) -> Option<&JobReport> {
        self.jobs.iter().find(|r| &r.job.id == id)
    }

    pub fn published(&self) -> Vec<&PublishResult> {
        self.jobs
            .iter()
            .filter_map(|r| match &r.publish {
                Some(PublishOutcome::Published(result)) => Some(result),
                _ => None,
            })
            .collect()
    }

    fn status(&self) -> ExecutionStatus {
        let blocking: Vec<_> = self
            .jobs
            .iter()
            .filter(|r| r.is_blocking_failure())
            .collect();
        if blocking.is_empty() {
            ExecutionStatus::Completed
        } else if blocking
            .iter()
            .all(|r| matches!(r.state, JobState::Cancelled { .. }))
        {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        }
    }
}

#[derive(Clone, Default)]
struct EventEmitter {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventEmitter {
    fn lock(&self) -> MutexGuard<'_, Vec<EventHandler>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ExecutionEvent) {
        let handlers = self.lock().clone();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

struct StepEvents {
    emitter: EventEmitter,
    job: JobId,
}

impl StepObserver for StepEvents {
    fn step_started(&self, kind: StepKind) {
        self.emitter.emit(ExecutionEvent::StepStarted {
            job: self.job.clone(),
            step: kind,
        });
    }

    fn step_finished(&self, result: &StepResult) {
        self.emitter.emit(ExecutionEvent::StepFinished {
            job: self.job.clone(),
            result: result.clone(),
        });
    }
}

/// Shared by every job task of one run
struct JobContext<E> {
    runner: StepRunner<E>,
    gate: ReleaseGate,
    trigger: Trigger,
    cache: Option<Arc<CacheManager>>,
    publisher: Option<Arc<ArtifactPublisher>>,
    credentials: Option<Credentials>,
    emitter: EventEmitter,
}

/// Main matrix execution engine
pub struct ExecutionEngine<E> {
    executor: Arc<E>,
    options: EngineOptions,
    cache: Option<Arc<CacheManager>>,
    publisher: Option<Arc<ArtifactPublisher>>,
    credentials: Option<Credentials>,
    emitter: EventEmitter,
    cancels: Arc<Mutex<HashMap<JobId, CancelToken>>>,
    cancel_all: Arc<AtomicBool>,
}

impl<E: CommandExecutor + 'static> ExecutionEngine<E> {
    pub fn new(executor: E, options: EngineOptions) -> Self {
        Self {
            executor: Arc::new(executor),
            options,
            cache: None,
            publisher: None,
            credentials: None,
            emitter: EventEmitter::default(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            cancel_all: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn with_publisher(mut self, publisher: ArtifactPublisher) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.emitter.lock().push(Arc::new(handler));
    }

    /// Cancel one job. Returns false if the job is unknown to the current run.
    pub fn cancel(&self, id: &JobId) -> bool {
        let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        match cancels.get(id) {
            Some(token) => {
                info!("Cancelling job {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every job, including ones not yet started
    pub fn cancel_all(&self) {
        self.canceller().cancel_all();
    }

    /// A handle that can cancel jobs while `execute` is running
    pub fn canceller(&self) -> Canceller {
        Canceller {
            cancels: self.cancels.clone(),
            cancel_all: self.cancel_all.clone(),
        }
    }

    /// Execute every job of the plan
    pub async fn execute(&self, plan: &MatrixPlan, trigger: &Trigger) -> Result<MatrixReport> {
        let mut run = RunState::new();
        let run_id = run.run_id;

        if !plan.branches.allows(trigger.ref_name()) {
            info!(
                "Skipping matrix {}: {} is excluded by the branch filter",
                plan.name, trigger
            );
            self.emitter.emit(ExecutionEvent::RunSkipped {
                run_id,
                ref_name: trigger.ref_name().map(str::to_string),
            });
            run.finish(ExecutionStatus::Skipped);
            return Ok(MatrixReport {
                name: plan.name.clone(),
                trigger: trigger.clone(),
                run,
                jobs: Vec::new(),
            });
        }

        let resolver = plan.resolver(&self.options.build_root)?;

        info!(
            "Starting matrix run: {} ({}, {} jobs, {})",
            plan.name,
            trigger,
            plan.jobs.len(),
            self.options.strategy
        );
        run.start(plan.jobs.len());
        self.emitter.emit(ExecutionEvent::RunStarted {
            run_id,
            matrix: plan.name.clone(),
            jobs: plan.jobs.len(),
        });

        let context = Arc::new(JobContext {
            runner: StepRunner::new(self.executor.clone(), self.options.workspace.clone()),
            gate: ReleaseGate::new(plan.release_channel.clone()),
            trigger: trigger.clone(),
            cache: self.cache.clone(),
            publisher: self.publisher.clone(),
            credentials: self.credentials.clone(),
            emitter: self.emitter.clone(),
        });

        let tokens: Vec<CancelToken> = {
            let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.clear();
            plan.jobs
                .iter()
                .map(|job| {
                    let token = CancelToken::new();
                    if self.cancel_all.load(Ordering::SeqCst) {
                        token.cancel();
                    }
                    cancels.insert(job.id.clone(), token.clone());
                    token
                })
                .collect()
        };

        let scheduler = ExecutionScheduler::new(self.options.strategy, plan.jobs.len());
        let mut handles = Vec::with_capacity(plan.jobs.len());

        // Slots are taken in document order, so sequential runs keep row order
        for (job, cancel) in plan.jobs.iter().zip(tokens) {
            let permit = scheduler.acquire().await?;
            let env = resolver.resolve(job);
            let steps = plan.steps_for(job, &env);
            let context = context.clone();
            let job = job.clone();

            handles.push(tokio::spawn(async move {
                let report = run_job(&context, job, steps, env, cancel).await;
                drop(permit);
                report
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (job, handle) in plan.jobs.iter().zip(handles) {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!("Job {} task failed: {}", job.id, e);
                    let now = Utc::now();
                    JobReport {
                        job: job.clone(),
                        state: JobState::Failed {
                            step: StepKind::Install,
                            error: e.to_string(),
                            started_at: now,
                            failed_at: now,
                        },
                        outcome: RunOutcome::default(),
                        release: None,
                        publish: None,
                    }
                }
            };
            run.record(&report.state);
            reports.push(report);
        }

        let mut report = MatrixReport {
            name: plan.name.clone(),
            trigger: trigger.clone(),
            run,
            jobs: reports,
        };
        let status = report.status();
        report.run.finish(status);

        info!(
            "Matrix run finished: {} - {:?} ({} passed, {} failed, {} cancelled)",
            plan.name,
            status,
            report.run.passed_jobs,
            report.run.failed_jobs,
            report.run.cancelled_jobs
        );
        self.emitter
            .emit(ExecutionEvent::RunCompleted { run_id, status });

        Ok(report)
    }
}

/// Cancels jobs of a running engine from another task
#[derive(Clone)]
pub struct Canceller {
    cancels: Arc<Mutex<HashMap<JobId, CancelToken>>>,
    cancel_all: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel_all(&self) {
        self.cancel_all.store(true, Ordering::SeqCst);
        let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        for token in cancels.values() {
            token.cancel();
        }
    }
}

async fn run_job<E: CommandExecutor>(
    context: &JobContext<E>,
    job: Job,
    steps: Vec<Step>,
    env: EnvironmentSpec,
    cancel: CancelToken,
) -> JobReport {
    let started_at = Utc::now();
    info!("Starting job {}", job.name);
    context.emitter.emit(ExecutionEvent::JobStarted {
        job: job.id.clone(),
        name: job.name.clone(),
    });

    let cache_key = context.cache.as_ref().map(|cache| cache.key_for(&job));
    if let (Some(cache), Some(key)) = (&context.cache, &cache_key) {
        if !cancel.is_cancelled() {
            match cache.restore(key).await {
                Ok(Some(contents)) => match cache.unpack(&contents, &env.build_dir).await {
                    Ok(files) => context.emitter.emit(ExecutionEvent::CacheRestored {
                        job: job.id.clone(),
                        files,
                    }),
                    Err(e) => warn!("Failed to unpack cache {} for {}: {}", key, job.id, e),
                },
                Ok(None) => {}
                Err(e) => warn!("Failed to restore cache {} for {}: {}", key, job.id, e),
            }
        }
    }

    let observer = StepEvents {
        emitter: context.emitter.clone(),
        job: job.id.clone(),
    };
    let mut outcome = context
        .runner
        .run(
            &steps,
            &env,
            context.trigger.skip_tests(),
            &cancel,
            &observer,
        )
        .await;

    // Cancelled after the last step: nothing may be released
    if outcome.is_success() && cancel.is_cancelled() {
        outcome.cancelled = true;
    }

    let now = Utc::now();
    let state = if outcome.cancelled {
        info!("Job {} cancelled", job.name);
        context.emitter.emit(ExecutionEvent::JobCancelled {
            job: job.id.clone(),
        });
        JobState::Cancelled { cancelled_at: now }
    } else if let Some(step) = outcome.failed_step {
        let error = outcome
            .failure_reason()
            .unwrap_or_else(|| format!("{} failed", step));
        if job.allow_failure {
            warn!("Job {} failed (allowed): {}", job.name, error);
        } else {
            error!("Job {} failed: {}", job.name, error);
        }
        context.emitter.emit(ExecutionEvent::JobFailed {
            job: job.id.clone(),
            step,
            error: error.clone(),
            allow_failure: job.allow_failure,
        });
        JobState::Failed {
            step,
            error,
            started_at,
            failed_at: now,
        }
    } else {
        info!("Job {} passed", job.name);
        context.emitter.emit(ExecutionEvent::JobPassed {
            job: job.id.clone(),
        });
        JobState::Passed {
            started_at,
            completed_at: now,
        }
    };

    let mut release = None;
    let mut publish = None;

    if state.is_passed() {
        let decision = context.gate.decide(&job, &context.trigger);
        match decision.tag() {
            Some(tag) => publish = publish_job(context, &job, tag, &env).await,
            None => context.emitter.emit(ExecutionEvent::ReleaseSkipped {
                job: job.id.clone(),
                reason: decision.reason.clone(),
            }),
        }
        release = Some(decision);

        if let (Some(cache), Some(key)) = (&context.cache, &cache_key) {
            if !cancel.is_cancelled() {
                save_cache(context, cache, key, &job, &env).await;
            }
        }
    }

    JobReport {
        job,
        state,
        outcome,
        release,
        publish,
    }
}

async fn publish_job<E>(
    context: &JobContext<E>,
    job: &Job,
    tag: &str,
    env: &EnvironmentSpec,
) -> Option<PublishOutcome> {
    let Some(publisher) = &context.publisher else {
        info!("Job {} is release-eligible but no deploy is configured", job.name);
        return None;
    };

    let result = match &context.credentials {
        Some(credentials) => publisher
            .publish(job, tag, &env.build_dir, credentials)
            .await
            .map_err(|e| e.to_string()),
        None => Err(format!(
            "no release credentials: ${} is not set",
            publisher.deploy().token_env
        )),
    };

    match result {
        Ok(result) => {
            context.emitter.emit(ExecutionEvent::Published {
                job: job.id.clone(),
                result: result.clone(),
            });
            Some(PublishOutcome::Published(result))
        }
        Err(e) => {
            error!("Publishing {} failed: {}", job.name, e);
            context.emitter.emit(ExecutionEvent::PublishFailed {
                job: job.id.clone(),
                error: e.clone(),
            });
            Some(PublishOutcome::Failed(e))
        }
    }
}

async fn save_cache<E>(
    context: &JobContext<E>,
    cache: &CacheManager,
    key: &crate::persistence::cache::CacheKey,
    job: &Job,
    env: &EnvironmentSpec,
) {
    let contents = match cache.snapshot(&env.build_dir).await {
        Ok(Some(contents)) => contents,
        Ok(None) => return,
        Err(e) => {
            warn!("Failed to snapshot {} for cache: {}", env.build_dir.display(), e);
            return;
        }
    };

    match cache.save(key, contents).await {
        Ok(()) => context.emitter.emit(ExecutionEvent::CacheSaved {
            job: job.id.clone(),
            key: key.to_string(),
        }),
        Err(e) => warn!("Failed to save cache {} for {}: {}", key, job.id, e),
    }
}
