//! Matrix plan - the expanded, validated form of a matrix document

use crate::core::{
    config::{BranchFilter, CacheConfig, DeployConfig, MatrixConfig},
    environment::{EnvironmentResolver, EnvironmentSpec, PathRule},
    job::{Job, JobId},
    matrix::expand,
    step::{CommandTemplates, Step, StepPlan},
};
use crate::execution::release::ReleaseGate;
use anyhow::Result;
use std::path::Path;

/// An expanded matrix ready to execute
#[derive(Debug, Clone)]
pub struct MatrixPlan {
    /// Matrix name
    pub name: String,

    /// Crate name used in archive names
    pub crate_name: String,

    /// The single release channel
    pub release_channel: String,

    /// Jobs in document order
    pub jobs: Vec<Job>,

    pub commands: CommandTemplates,

    pub path_rules: Vec<PathRule>,

    pub branches: BranchFilter,

    pub deploy: Option<DeployConfig>,

    pub cache: CacheConfig,
}

impl MatrixPlan {
    /// Create a plan from configuration
    pub fn from_config(config: &MatrixConfig) -> Result<Self> {
        let jobs = expand(&config.matrix, &config.defaults)?;
        let gate = ReleaseGate::new(&config.defaults.release_channel);
        gate.validate(&jobs)?;

        Ok(MatrixPlan {
            name: config.name.clone(),
            crate_name: config.crate_name().to_string(),
            release_channel: gate.release_channel().to_string(),
            jobs,
            commands: config.commands.clone(),
            path_rules: config.path_rules.clone(),
            branches: BranchFilter::compile(&config.branches)?,
            deploy: config.deploy.clone(),
            cache: config.cache.clone(),
        })
    }

    /// Get a job by identity
    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| &j.id == id)
    }

    /// Environment resolver rooted at `build_root`
    pub fn resolver(&self, build_root: &Path) -> Result<EnvironmentResolver> {
        Ok(EnvironmentResolver::new(&self.path_rules, build_root)?)
    }

    /// Ordered steps for a job under its resolved environment
    pub fn steps_for(&self, job: &Job, env: &EnvironmentSpec) -> Vec<Step> {
        let variables =
            StepPlan::variables(job, &self.crate_name, &env.build_dir, &env.rustflags_string());
        StepPlan::for_job(job, &self.commands, &variables)
    }
}
