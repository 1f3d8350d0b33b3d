//! Environment resolution - computes the process environment for a job

use crate::core::{error::ConfigError, job::Job};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Adds directories to PATH for targets matching a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    /// Regex matched against the target triple
    pub target: String,

    /// Directories prepended to PATH, in order
    pub paths: Vec<String>,
}

/// Everything a toolchain command needs to run for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Toolchain channel selector
    pub toolchain: String,

    /// Directories to put in front of PATH
    pub path_prepend: Vec<PathBuf>,

    /// Compiler flag tokens, one per flag
    pub rustflags: Vec<String>,

    /// Job-scoped build output directory
    pub build_dir: PathBuf,

    /// Plain variables
    pub vars: BTreeMap<String, String>,
}

impl EnvironmentSpec {
    /// Compiler flags as the single string the toolchain expects
    pub fn rustflags_string(&self) -> String {
        self.rustflags.join(" ")
    }

    /// Final variable list for a child process.
    ///
    /// `base_path` is the inherited PATH; prepended directories come first.
    pub fn to_process_env(&self, base_path: Option<OsString>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        env.push(("RUSTUP_TOOLCHAIN".to_string(), self.toolchain.clone()));
        env.push((
            "CARGO_TARGET_DIR".to_string(),
            self.build_dir.to_string_lossy().into_owned(),
        ));

        if !self.rustflags.is_empty() {
            env.push(("RUSTFLAGS".to_string(), self.rustflags_string()));
        }

        if !self.path_prepend.is_empty() {
            let mut dirs: Vec<PathBuf> = self.path_prepend.clone();
            if let Some(base) = base_path {
                dirs.extend(std::env::split_paths(&base));
            }
            match std::env::join_paths(dirs) {
                Ok(joined) => {
                    env.push(("PATH".to_string(), joined.to_string_lossy().into_owned()))
                }
                Err(e) => warn!(
                    "Cannot build PATH with {:?}: {}; using the inherited PATH",
                    self.path_prepend, e
                ),
            }
        }

        env
    }
}

struct CompiledRule {
    pattern: Regex,
    paths: Vec<PathBuf>,
}

/// Resolves jobs into environment specs
pub struct EnvironmentResolver {
    rules: Vec<CompiledRule>,
    build_root: PathBuf,
}

impl EnvironmentResolver {
    pub fn new(rules: &[PathRule], build_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.target).map_err(|e| ConfigError::InvalidPattern {
                    field: "path_rules".to_string(),
                    pattern: rule.target.clone(),
                    message: e.to_string(),
                })?;
                for path in &rule.paths {
                    // A separator inside one entry would split it into two
                    if let Err(e) = std::env::join_paths([path]) {
                        return Err(ConfigError::InvalidPattern {
                            field: "path_rules.paths".to_string(),
                            pattern: path.clone(),
                            message: e.to_string(),
                        });
                    }
                }
                Ok(CompiledRule {
                    pattern,
                    paths: rule.paths.iter().map(PathBuf::from).collect(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rules,
            build_root: build_root.into(),
        })
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Job-scoped build output directory
    pub fn build_dir(&self, job: &Job) -> PathBuf {
        self.build_root.join(job.id.slug())
    }

    /// Compute the environment for a job
    pub fn resolve(&self, job: &Job) -> EnvironmentSpec {
        let mut path_prepend: Vec<PathBuf> = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(job.target()) {
                for path in &rule.paths {
                    if !path_prepend.contains(path) {
                        path_prepend.push(path.clone());
                    }
                }
            }
        }

        let mut vars = BTreeMap::new();
        vars.insert("TARGET".to_string(), job.target().to_string());
        vars.insert("CHANNEL".to_string(), job.channel().to_string());
        vars.insert("MATRIX_JOB".to_string(), job.id.to_string());
        for (key, value) in &job.env {
            vars.insert(key.clone(), value.clone());
        }

        EnvironmentSpec {
            toolchain: job.channel().to_string(),
            path_prepend,
            rustflags: compiler_flags(job.features(), job.cpu()),
            build_dir: self.build_dir(job),
            vars,
        }
    }
}

/// Compiler flag tokens for a feature string and a cpu hint.
///
/// Features come first, then the cpu hint; empty inputs produce no token.
pub fn compiler_flags(features: &str, cpu: &str) -> Vec<String> {
    let mut flags = Vec::new();

    let features: Vec<String> = features
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .map(|f| {
            if f.starts_with('+') || f.starts_with('-') {
                f.to_string()
            } else {
                format!("+{}", f)
            }
        })
        .collect();

    if !features.is_empty() {
        flags.push(format!("-Ctarget-feature={}", features.join(",")));
    }

    let cpu = cpu.trim();
    if !cpu.is_empty() {
        flags.push(format!("-Ctarget-cpu={}", cpu));
    }

    flags
}
