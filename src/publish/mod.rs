//! Release publishing: package a job's binaries and upload them once

pub mod host;
pub mod package;

pub use host::{CommandReleaseHost, ReleaseHost, ReleaseUpload};

use crate::core::{config::DeployConfig, Job};
use package::PackageSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Error types for publishing
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("packaging failed: {0}")]
    Packaging(String),

    #[error("missing artifact: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("no release credentials: ${var} is not set")]
    MissingCredentials { var: String },

    #[error("upload failed (exit code {exit_code:?}): {stderr}")]
    Upload {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// A release token. Never printed.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read the token from the named environment variable
    pub fn from_env(var: &str) -> Result<Self, PublishError> {
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(PublishError::MissingCredentials {
                var: var.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.token
    }

    /// Replace every occurrence of the token in `text`
    pub fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            return text.to_string();
        }
        text.replace(&self.token, "***")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A published archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub tag: String,
    pub target: String,
    pub archive: PathBuf,
    pub size: u64,
}

/// Packages release archives and hands them to a release host
pub struct ArtifactPublisher {
    deploy: DeployConfig,
    crate_name: String,
    staging_dir: PathBuf,
    workspace: PathBuf,
    host: Arc<dyn ReleaseHost>,
}

impl ArtifactPublisher {
    pub fn new(
        deploy: DeployConfig,
        staging_dir: impl Into<PathBuf>,
        host: Arc<dyn ReleaseHost>,
    ) -> Self {
        Self {
            deploy,
            crate_name: String::new(),
            staging_dir: staging_dir.into(),
            workspace: PathBuf::from("."),
            host,
        }
    }

    /// Crate name used in the archive template
    pub fn with_crate_name(mut self, crate_name: impl Into<String>) -> Self {
        self.crate_name = crate_name.into();
        self
    }

    /// Directory that `deploy.include` paths are relative to
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn deploy(&self) -> &DeployConfig {
        &self.deploy
    }

    /// Package the job's release binaries and attempt one upload
    pub async fn publish(
        &self,
        job: &Job,
        tag: &str,
        build_output: &Path,
        credentials: &Credentials,
    ) -> Result<PublishResult, PublishError> {
        let (archive, size) = {
            let deploy = self.deploy.clone();
            let crate_name = self.crate_name.clone();
            let tag = tag.to_string();
            let job = job.clone();
            let build_output = build_output.to_path_buf();
            let workspace = self.workspace.clone();
            let staging_dir = self.staging_dir.clone();

            tokio::task::spawn_blocking(move || -> Result<(PathBuf, u64), PublishError> {
                let spec = PackageSpec {
                    crate_name: &crate_name,
                    tag: &tag,
                    binaries: &deploy.binaries,
                    include: &deploy.include,
                    archive_template: &deploy.archive,
                };
                let archive =
                    package::package(&spec, &job, &build_output, &workspace, &staging_dir)?;
                let size = std::fs::metadata(&archive)?.len();
                Ok((archive, size))
            })
            .await
            .map_err(|e| PublishError::Packaging(e.to_string()))??
        };
        info!("Packaged {} ({} bytes)", archive.display(), size);

        let upload = ReleaseUpload {
            tag: tag.to_string(),
            target: job.target().to_string(),
            artifact: archive.clone(),
            description: self.deploy.description.clone(),
        };
        self.host.upload(&upload, credentials).await?;

        info!("Published {} for {}", archive.display(), tag);
        Ok(PublishResult {
            tag: tag.to_string(),
            target: job.target().to_string(),
            archive,
            size,
        })
    }
}
