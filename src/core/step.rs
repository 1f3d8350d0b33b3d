//! Step domain model

use crate::core::job::Job;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// What a step does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Install the toolchain for the job's channel and target
    Install,
    /// Compile, debug or release
    Build { release: bool },
    /// Run tests, debug or release
    Test { release: bool },
}

impl StepKind {
    /// Steps that belong to the test phase, skipped on tag pushes.
    ///
    /// The release build is not part of it: a release needs it.
    pub fn is_test_phase(&self) -> bool {
        matches!(
            self,
            StepKind::Build { release: false } | StepKind::Test { .. }
        )
    }

    pub fn is_test(&self) -> bool {
        matches!(self, StepKind::Test { .. })
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Install => write!(f, "install"),
            StepKind::Build { release: false } => write!(f, "build"),
            StepKind::Build { release: true } => write!(f, "build-release"),
            StepKind::Test { release: false } => write!(f, "test"),
            StepKind::Test { release: true } => write!(f, "test-release"),
        }
    }
}

/// Command templates for each step kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    pub install: String,
    pub build: String,
    pub build_release: String,
    pub test: String,
    pub test_release: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            install: "rustup toolchain install {{ channel }} --profile minimal --target {{ target }}"
                .to_string(),
            build: "cargo build --target {{ target }}".to_string(),
            build_release: "cargo build --release --target {{ target }}".to_string(),
            test: "cargo test --target {{ target }}".to_string(),
            test_release: "cargo test --release --target {{ target }}".to_string(),
        }
    }
}

impl CommandTemplates {
    fn template_for(&self, kind: StepKind) -> &str {
        match kind {
            StepKind::Install => &self.install,
            StepKind::Build { release: false } => &self.build,
            StepKind::Build { release: true } => &self.build_release,
            StepKind::Test { release: false } => &self.test,
            StepKind::Test { release: true } => &self.test_release,
        }
    }
}

/// A single external command invocation for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,

    /// Rendered shell command
    pub command: String,

    pub timeout: Duration,
}

/// Result of one executed step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub kind: StepKind,
    pub command: String,

    /// None when the process never produced an exit code
    pub exit_code: Option<i32>,

    /// Captured stdout followed by stderr
    pub output: String,

    pub duration: Duration,
    pub timed_out: bool,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Ordered steps for a job
pub struct StepPlan;

impl StepPlan {
    /// The canonical step order: install, builds, then tests
    pub const ORDER: [StepKind; 5] = [
        StepKind::Install,
        StepKind::Build { release: false },
        StepKind::Build { release: true },
        StepKind::Test { release: false },
        StepKind::Test { release: true },
    ];

    /// Build the step list for a job.
    ///
    /// Jobs with `disable_tests` keep their builds but never run tests.
    pub fn for_job(
        job: &Job,
        templates: &CommandTemplates,
        variables: &HashMap<String, String>,
    ) -> Vec<Step> {
        Self::ORDER
            .iter()
            .filter(|kind| !(job.disable_tests && kind.is_test()))
            .map(|kind| Step {
                kind: *kind,
                command: render_template(templates.template_for(*kind), variables),
                timeout: Duration::from_secs(job.timeout_secs),
            })
            .collect()
    }

    /// Template variables for a job
    pub fn variables(
        job: &Job,
        crate_name: &str,
        build_dir: &Path,
        rustflags: &str,
    ) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("target".to_string(), job.target().to_string());
        vars.insert("channel".to_string(), job.channel().to_string());
        vars.insert("features".to_string(), job.features().to_string());
        vars.insert("cpu".to_string(), job.cpu().to_string());
        vars.insert("name".to_string(), job.name.clone());
        vars.insert("crate_name".to_string(), crate_name.to_string());
        vars.insert(
            "build_dir".to_string(),
            build_dir.to_string_lossy().into_owned(),
        );
        vars.insert("rustflags".to_string(), rustflags.to_string());
        vars
    }
}

/// Replace variables in the form {{ variable_name }}
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in variables {
        let placeholder = format!("{{{{ {} }}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}
