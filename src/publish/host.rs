//! Release hosts - where archives are uploaded

use crate::core::render_template;
use crate::execution::command::CommandExecutor;
use crate::publish::{Credentials, PublishError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable the upload command reads the token from
pub const TOKEN_ENV: &str = "RELEASE_TOKEN";

/// One archive to attach to a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseUpload {
    pub tag: String,
    pub target: String,
    pub artifact: PathBuf,
    pub description: Option<String>,
}

/// Trait for release hosting - allows for different implementations
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    /// Attach an archive to the release for `upload.tag`.
    ///
    /// Called at most once per archive; no retries.
    async fn upload(
        &self,
        upload: &ReleaseUpload,
        credentials: &Credentials,
    ) -> Result<(), PublishError>;
}

/// Uploads by running a command template, e.g. `gh release upload`
pub struct CommandReleaseHost<E> {
    executor: Arc<E>,
    template: String,
    workdir: PathBuf,
}

impl<E: CommandExecutor> CommandReleaseHost<E> {
    pub fn new(executor: Arc<E>, template: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            template: template.into(),
            workdir: workdir.into(),
        }
    }

    /// The command line, which never contains the token
    pub fn render(&self, upload: &ReleaseUpload) -> String {
        let mut vars = HashMap::new();
        vars.insert("tag".to_string(), upload.tag.clone());
        vars.insert("target".to_string(), upload.target.clone());
        vars.insert(
            "artifact".to_string(),
            upload.artifact.to_string_lossy().into_owned(),
        );
        vars.insert(
            "description".to_string(),
            upload.description.clone().unwrap_or_default(),
        );
        render_template(&self.template, &vars)
    }
}

#[async_trait]
impl<E: CommandExecutor> ReleaseHost for CommandReleaseHost<E> {
    async fn upload(
        &self,
        upload: &ReleaseUpload,
        credentials: &Credentials,
    ) -> Result<(), PublishError> {
        let command = self.render(upload);
        info!("Uploading {} to release {}", upload.artifact.display(), upload.tag);

        let env = vec![(TOKEN_ENV.to_string(), credentials.expose().to_string())];
        let output = self
            .executor
            .execute(&command, &env, &self.workdir)
            .await
            .map_err(|e| PublishError::Upload {
                exit_code: None,
                stderr: credentials.redact(&e.to_string()),
            })?;

        if !output.success() {
            warn!("Upload of {} failed", upload.artifact.display());
            return Err(PublishError::Upload {
                exit_code: output.exit_code,
                stderr: credentials.redact(output.stderr.trim()),
            });
        }

        Ok(())
    }
}
