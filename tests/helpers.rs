//! Test utility functions for buildmatrix scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use buildmatrix::core::config::MatrixConfig;
use buildmatrix::core::{JobId, MatrixPlan, StepKind, Trigger};
use buildmatrix::execution::{
    CommandError, CommandExecutor, CommandOutput, EngineOptions, ExecutionEngine, ExecutionEvent,
    MatrixReport, SchedulingStrategy,
};
use buildmatrix::publish::{Credentials, PublishError, ReleaseHost, ReleaseUpload};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A command the mock executor saw
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: String,
    pub env: HashMap<String, String>,
}

impl RecordedCall {
    pub fn target(&self) -> &str {
        self.env.get("TARGET").map(String::as_str).unwrap_or("")
    }

    pub fn channel(&self) -> &str {
        self.env.get("CHANNEL").map(String::as_str).unwrap_or("")
    }
}

/// Executor that succeeds unless a rule says otherwise.
///
/// Rules match on a substring of `<TARGET>/<CHANNEL> <command>`. Release builds
/// write the configured binaries into the job's build directory.
#[derive(Default)]
pub struct MockExecutor {
    failures: Vec<(String, i32)>,
    delays: Vec<(String, Duration)>,
    binaries: Vec<String>,
    calls: Mutex<Vec<RecordedCall>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` when the pattern matches
    pub fn fail_when(mut self, pattern: &str, code: i32) -> Self {
        self.failures.push((pattern.to_string(), code));
        self
    }

    /// Sleep before answering when the pattern matches
    pub fn delay_when(mut self, pattern: &str, delay: Duration) -> Self {
        self.delays.push((pattern.to_string(), delay));
        self
    }

    /// Binaries produced by release builds
    pub fn with_binaries(mut self, binaries: &[&str]) -> Self {
        self.binaries = binaries.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.target() == target)
            .map(|c| c.command)
            .collect()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn write_binaries(&self, env: &HashMap<String, String>) {
        let (Some(build_dir), Some(target)) = (env.get("CARGO_TARGET_DIR"), env.get("TARGET"))
        else {
            return;
        };
        let release = PathBuf::from(build_dir).join(target).join("release");
        std::fs::create_dir_all(&release).unwrap();
        for binary in &self.binaries {
            let name = if target.contains("windows") {
                format!("{}.exe", binary)
            } else {
                binary.clone()
            };
            std::fs::write(release.join(name), format!("{} for {}", binary, target)).unwrap();
        }
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(
        &self,
        command: &str,
        env: &[(String, String)],
        _cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        let env: HashMap<String, String> = env.iter().cloned().collect();
        let call = RecordedCall {
            command: command.to_string(),
            env,
        };
        let subject = format!("{}/{} {}", call.target(), call.channel(), command);
        self.calls.lock().unwrap().push(call.clone());

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let delay = self
            .delays
            .iter()
            .find(|(pattern, _)| subject.contains(pattern.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let exit_code = self
            .failures
            .iter()
            .find(|(pattern, _)| subject.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        if exit_code == 0 && command.starts_with("cargo build --release") {
            self.write_binaries(&call.env);
        }

        Ok(CommandOutput {
            exit_code: Some(exit_code),
            stdout: format!("$ {}", command),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "error: could not compile".to_string()
            },
        })
    }
}

/// Release host that records uploads instead of sending them
#[derive(Default)]
pub struct MockReleaseHost {
    uploads: Mutex<Vec<ReleaseUpload>>,
    fail: bool,
}

impl MockReleaseHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> Vec<ReleaseUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseHost for MockReleaseHost {
    async fn upload(
        &self,
        upload: &ReleaseUpload,
        _credentials: &Credentials,
    ) -> Result<(), PublishError> {
        self.uploads.lock().unwrap().push(upload.clone());
        if self.fail {
            return Err(PublishError::Upload {
                exit_code: Some(1),
                stderr: "release not found".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse and expand a matrix document
pub fn plan_from(yaml: &str) -> MatrixPlan {
    MatrixConfig::from_yaml(yaml)
        .expect("matrix should be valid")
        .to_plan()
        .expect("plan should expand")
}

/// Engine options rooted in a scratch directory
pub fn options(root: &Path, strategy: SchedulingStrategy) -> EngineOptions {
    EngineOptions {
        build_root: root.join("build"),
        workspace: root.to_path_buf(),
        strategy,
    }
}

/// Collects every event an engine emits
pub fn record_events<E: CommandExecutor + 'static>(
    engine: &ExecutionEngine<E>,
) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
    events
}

/// Step kinds a job executed, in order
pub fn executed_steps(report: &MatrixReport, target: &str) -> Vec<StepKind> {
    report
        .jobs
        .iter()
        .find(|r| r.job.target() == target)
        .unwrap_or_else(|| panic!("no job for {}", target))
        .outcome
        .executed()
}

pub fn job_id(target: &str) -> JobId {
    JobId::new(target, "", "", "stable")
}

pub fn tag(name: &str) -> Trigger {
    Trigger::tag(name)
}

pub fn commit() -> Trigger {
    Trigger::commit("master")
}
