//! Matrix execution: commands, step runner, release gate and the engine

pub mod command;
pub mod engine;
pub mod release;
pub mod runner;
pub mod scheduler;

pub use command::{CommandError, CommandExecutor, CommandOutput, ShellExecutor};
pub use engine::{
    EngineOptions, ExecutionEngine, ExecutionEvent, JobReport, MatrixReport, PublishOutcome,
};
pub use release::{ReleaseDecision, ReleaseGate, ReleaseReason};
pub use runner::{CancelToken, RunOutcome, StepRunner};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
