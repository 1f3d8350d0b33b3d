//! Matrix document configuration from YAML

use crate::core::{
    environment::{EnvironmentResolver, PathRule},
    error::ConfigError,
    matrix::{expand, MatrixDefaults, MatrixRow},
    plan::MatrixPlan,
    step::CommandTemplates,
};
use crate::execution::release::ReleaseGate;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level matrix document loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Matrix name, used in history and logs
    pub name: String,

    /// Crate name used in archive names (defaults to `name`)
    #[serde(default)]
    pub crate_name: Option<String>,

    /// Global defaults for every row
    #[serde(default)]
    pub defaults: MatrixDefaults,

    /// Matrix rows
    pub matrix: Vec<MatrixRow>,

    /// Step command templates
    #[serde(default)]
    pub commands: CommandTemplates,

    /// PATH augmentation per target
    #[serde(default)]
    pub path_rules: Vec<PathRule>,

    /// Which branches and tags run at all
    #[serde(default)]
    pub branches: BranchesConfig,

    /// Release packaging and upload
    #[serde(default)]
    pub deploy: Option<DeployConfig>,

    /// Build cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Branch filter configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchesConfig {
    /// Only these branches/tags run (empty = all)
    #[serde(default)]
    pub only: Vec<String>,

    /// These branches/tags never run
    #[serde(default)]
    pub except: Vec<String>,
}

/// Release packaging and upload configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Binary names collected from the release build output
    pub binaries: Vec<String>,

    /// Extra files added to the archive (relative to the workspace)
    #[serde(default)]
    pub include: Vec<String>,

    /// Archive file stem template
    #[serde(default = "default_archive_template")]
    pub archive: String,

    /// Upload command template; the token is exported as RELEASE_TOKEN
    pub upload: String,

    /// Environment variable holding the release token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Release description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_archive_template() -> String {
    "{{ crate_name }}-{{ tag }}-{{ target }}".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Build cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Bump to invalidate every existing entry
    pub version: String,

    /// Cache store directory (defaults to the user cache dir)
    pub dir: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: "v1".to_string(),
            dir: None,
        }
    }
}

/// Compiled branch filter
#[derive(Debug, Clone)]
pub struct BranchFilter {
    only: Vec<RefPattern>,
    except: Vec<RefPattern>,
}

#[derive(Debug, Clone)]
enum RefPattern {
    Exact(String),
    Regex(Regex),
}

impl RefPattern {
    fn parse(field: &str, pattern: &str) -> Result<Self, ConfigError> {
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let inner = &pattern[1..pattern.len() - 1];
            Regex::new(inner)
                .map(RefPattern::Regex)
                .map_err(|e| ConfigError::InvalidPattern {
                    field: field.to_string(),
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
        } else {
            Ok(RefPattern::Exact(pattern.to_string()))
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            RefPattern::Exact(exact) => exact == name,
            RefPattern::Regex(regex) => regex.is_match(name),
        }
    }
}

impl BranchFilter {
    pub fn compile(config: &BranchesConfig) -> Result<Self, ConfigError> {
        let only = config
            .only
            .iter()
            .map(|p| RefPattern::parse("branches.only", p))
            .collect::<Result<Vec<_>, _>>()?;
        let except = config
            .except
            .iter()
            .map(|p| RefPattern::parse("branches.except", p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { only, except })
    }

    /// Whether a branch or tag name should run. Unknown names always run.
    pub fn allows(&self, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return true;
        };
        if self.except.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.only.is_empty() || self.only.iter().any(|p| p.matches(name))
    }
}

impl MatrixConfig {
    /// Load matrix configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read matrix document {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid matrix document {}", path.display()))
    }

    /// Parse matrix configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: MatrixConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the matrix configuration
    pub fn validate(&self) -> Result<()> {
        if self.matrix.is_empty() {
            anyhow::bail!("Matrix '{}' has no rows", self.name);
        }

        let jobs = expand(&self.matrix, &self.defaults)?;

        ReleaseGate::new(&self.defaults.release_channel).validate(&jobs)?;

        EnvironmentResolver::new(&self.path_rules, ".")?;
        BranchFilter::compile(&self.branches)?;

        if let Some(deploy) = &self.deploy {
            if deploy.binaries.is_empty() {
                return Err(ConfigError::Invalid(
                    "deploy.binaries must name at least one binary".to_string(),
                )
                .into());
            }
            if deploy.upload.trim().is_empty() {
                return Err(
                    ConfigError::Invalid("deploy.upload must not be empty".to_string()).into(),
                );
            }
        }

        Ok(())
    }

    /// Crate name used in archive names
    pub fn crate_name(&self) -> &str {
        self.crate_name.as_deref().unwrap_or(&self.name)
    }

    /// Convert config to an expanded plan
    pub fn to_plan(&self) -> Result<MatrixPlan> {
        MatrixPlan::from_config(self)
    }
}
