//! Toolchain command execution

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Error types for command execution
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },
}

/// Output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Trait for toolchain command execution - allows for different implementations
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a shell command with extra environment variables in `cwd`.
    ///
    /// A nonzero exit is not an error; it is reported in the output.
    async fn execute(
        &self,
        command: &str,
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError>;
}

#[async_trait]
impl<T: CommandExecutor + ?Sized> CommandExecutor for std::sync::Arc<T> {
    async fn execute(
        &self,
        command: &str,
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        (**self).execute(command, env, cwd).await
    }
}

/// Runs commands through the platform shell as child processes
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(
        &self,
        command: &str,
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        debug!("Spawning: {}", command);

        // Dropping the future (timeout, cancellation) kills the child
        let output = Self::shell_command(command)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CommandError::Spawn {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        let exit_code = output.status.code();
        if !output.status.success() {
            warn!("'{}' exited with code {:?}", command, exit_code);
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
