//! Matrix expansion - turns declarative rows into jobs

use crate::core::{
    error::ConfigError,
    job::{Job, JobId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Global defaults applied to every matrix row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixDefaults {
    /// CPU feature flags (e.g. "+popcnt,+bmi2"); empty means platform default
    pub features: String,

    /// CPU hint (e.g. "haswell"); empty means platform default
    pub cpu: String,

    /// Toolchain channel
    pub channel: String,

    /// The single channel that publishes releases
    pub release_channel: String,

    pub allow_failure: bool,

    pub disable_tests: bool,

    /// Per-step timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MatrixDefaults {
    fn default() -> Self {
        Self {
            features: String::new(),
            cpu: String::new(),
            channel: "stable".to_string(),
            release_channel: "stable".to_string(),
            allow_failure: false,
            disable_tests: false,
            timeout_secs: 1800, // 30 minutes
        }
    }
}

/// One row of the matrix as written in the document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    /// Target platform triple (required)
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub features: Option<String>,

    #[serde(default)]
    pub cpu: Option<String>,

    #[serde(default)]
    pub channel: Option<String>,

    /// Display name override
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub allow_failure: Option<bool>,

    #[serde(default)]
    pub disable_tests: Option<bool>,

    /// Set to false to keep this row out of releases
    #[serde(default)]
    pub deploy: Option<bool>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extra environment variables for this row
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl MatrixRow {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_features(mut self, features: impl Into<String>) -> Self {
        self.features = Some(features.into());
        self
    }

    pub fn with_cpu(mut self, cpu: impl Into<String>) -> Self {
        self.cpu = Some(cpu.into());
        self
    }
}

/// Ordered matrix rows
pub type AxisSet = Vec<MatrixRow>;

/// Expand matrix rows into jobs.
///
/// Output order matches row order. Row values override defaults.
pub fn expand(rows: &[MatrixRow], defaults: &MatrixDefaults) -> Result<Vec<Job>, ConfigError> {
    let mut seen: HashMap<JobId, usize> = HashMap::new();
    let mut jobs = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 1;

        let target = row
            .target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingTarget { row: row_number })?;

        let features = pick(row.features.as_deref(), &defaults.features);
        let cpu = pick(row.cpu.as_deref(), &defaults.cpu);
        let channel = row
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(defaults.channel.trim())
            .to_string();

        let id = JobId::new(target, features, cpu, channel);

        if let Some(first) = seen.insert(id.clone(), row_number) {
            return Err(ConfigError::DuplicateJob {
                id: id.to_string(),
                first,
                second: row_number,
            });
        }

        let timeout_secs = row.timeout_secs.unwrap_or(defaults.timeout_secs);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "matrix row {} ({}) has a zero step timeout",
                row_number, id
            )));
        }

        let name = row
            .name
            .clone()
            .unwrap_or_else(|| default_name(&id));

        jobs.push(Job {
            is_release_channel: id.channel == defaults.release_channel.trim(),
            name,
            allow_failure: row.allow_failure.unwrap_or(defaults.allow_failure),
            disable_tests: row.disable_tests.unwrap_or(defaults.disable_tests),
            deploy: row.deploy.unwrap_or(true),
            timeout_secs,
            env: row.env.clone(),
            id,
        });
    }

    Ok(jobs)
}

fn pick(value: Option<&str>, default: &str) -> String {
    value.unwrap_or(default).trim().to_string()
}

fn default_name(id: &JobId) -> String {
    let mut name = format!("{} ({})", id.target, id.channel);
    if !id.features.is_empty() {
        name.push_str(&format!(" +{}", id.features.trim_start_matches('+')));
    }
    if !id.cpu.is_empty() {
        name.push_str(&format!(" cpu={}", id.cpu));
    }
    name
}
