//! Configuration errors

use thiserror::Error;

/// Errors raised while turning a matrix document into jobs.
///
/// These are fatal and surface before any job runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("matrix row {row} has no target platform")]
    MissingTarget { row: usize },

    #[error("matrix rows {first} and {second} both resolve to job {id}")]
    DuplicateJob {
        id: String,
        first: usize,
        second: usize,
    },

    #[error("target '{target}' has more than one deployable job on the release channel")]
    AmbiguousRelease { target: String },

    #[error("invalid pattern '{pattern}' in {field}: {message}")]
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },

    #[error("{0}")]
    Invalid(String),
}
