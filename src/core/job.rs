//! Job domain model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a job: one combination of matrix axes.
///
/// Two jobs with the same identity are a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId {
    pub target: String,
    pub features: String,
    pub cpu: String,
    pub channel: String,
}

impl JobId {
    pub fn new(
        target: impl Into<String>,
        features: impl Into<String>,
        cpu: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            features: features.into(),
            cpu: cpu.into(),
            channel: channel.into(),
        }
    }

    /// Filesystem-safe form, used to partition build output between jobs
    pub fn slug(&self) -> String {
        let raw = format!(
            "{}-{}-{}-{}",
            self.target,
            self.channel,
            or_dash(&self.features),
            or_dash(&self.cpu)
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.target,
            self.channel,
            or_dash(&self.features),
            or_dash(&self.cpu)
        )
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// A fully resolved matrix row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Axis identity
    pub id: JobId,

    /// Human-readable name shown in logs
    pub name: String,

    /// Whether the job's channel is the designated release channel
    pub is_release_channel: bool,

    /// Failures of this job do not fail the run
    pub allow_failure: bool,

    /// Build but never execute tests (e.g. cross targets)
    pub disable_tests: bool,

    /// Whether this job may produce a release artifact
    pub deploy: bool,

    /// Per-step timeout in seconds
    pub timeout_secs: u64,

    /// Extra environment variables for this row
    pub env: BTreeMap<String, String>,
}

impl Job {
    pub fn target(&self) -> &str {
        &self.id.target
    }

    pub fn channel(&self) -> &str {
        &self.id.channel
    }

    pub fn features(&self) -> &str {
        &self.id.features
    }

    pub fn cpu(&self) -> &str {
        &self.id.cpu
    }

    /// Whether binaries for this target carry an `.exe` suffix
    pub fn is_windows(&self) -> bool {
        self.id.target.contains("windows")
    }
}
