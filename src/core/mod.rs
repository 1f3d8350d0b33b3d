//! Core domain models for the build matrix
//!
//! This module defines the fundamental data structures that represent
//! matrix documents, jobs, triggers, environments and steps.

pub mod config;
pub mod environment;
pub mod error;
pub mod job;
pub mod matrix;
pub mod plan;
pub mod state;
pub mod step;
pub mod trigger;

pub use environment::{EnvironmentResolver, EnvironmentSpec};
pub use error::ConfigError;
pub use job::{Job, JobId};
pub use plan::MatrixPlan;
pub use state::*;
pub use step::*;
pub use trigger::Trigger;
