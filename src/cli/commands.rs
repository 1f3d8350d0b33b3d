//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;

/// Run every job of a matrix
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to matrix YAML file
    #[arg(short, long)]
    pub file: String,

    /// Treat the run as a push of this tag (overrides CI variables)
    #[arg(long)]
    pub tag: Option<String>,

    /// Branch being built (overrides CI variables)
    #[arg(long)]
    pub branch: Option<String>,

    /// Scheduling strategy: sequential, parallel or a job count
    #[arg(long, default_value = "sequential", value_parser = parse_strategy)]
    pub strategy: SchedulingStrategy,

    /// Parent directory of every job's build output
    #[arg(long, default_value = "target/matrix")]
    pub build_root: String,

    /// Directory release archives are written to
    #[arg(long, default_value = "target/matrix/dist")]
    pub staging_dir: String,

    /// Don't restore or save build caches
    #[arg(long)]
    pub no_cache: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print captured output of failed steps
    #[arg(long)]
    pub show_output: bool,
}

/// Validate a matrix document
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to matrix YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the jobs a matrix expands to
#[derive(Debug, Args, Clone)]
pub struct ExpandCommand {
    /// Path to matrix YAML file
    #[arg(short, long)]
    pub file: String,

    /// Show release eligibility for a push of this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Matrix name to filter by
    #[arg(short, long)]
    pub matrix: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse a scheduling strategy argument
pub fn parse_strategy(s: &str) -> Result<SchedulingStrategy, String> {
    s.parse()
}
