//! buildmatrix - build, test and release a crate across a matrix of targets

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod publish;

// Re-export commonly used types
pub use core::{
    config::MatrixConfig, ConfigError, EnvironmentResolver, EnvironmentSpec, ExecutionStatus, Job,
    JobId, MatrixPlan, StepKind, StepResult, Trigger,
};
pub use execution::{
    CancelToken, CommandExecutor, EngineOptions, ExecutionEngine, ExecutionEvent, MatrixReport,
    ReleaseDecision, ReleaseGate, RunOutcome, SchedulingStrategy, ShellExecutor, StepRunner,
};
pub use persistence::cache::{CacheContents, CacheKey, CacheManager, CacheStore};
pub use publish::{ArtifactPublisher, Credentials, PublishError, PublishResult, ReleaseHost};
