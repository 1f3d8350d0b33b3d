//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ExpandCommand, HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Matrix build/test/deploy orchestrator for compiled crates
#[derive(Debug, Parser, Clone)]
#[command(name = "buildmatrix")]
#[command(version)]
#[command(about = "Build, test and release a crate across a matrix of targets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run every job of a matrix
    Run(RunCommand),

    /// Validate a matrix document
    Validate(ValidateCommand),

    /// Show the jobs a matrix expands to
    Expand(ExpandCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
