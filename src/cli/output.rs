//! CLI output formatting

use crate::{
    core::{ExecutionStatus, Job, JobState},
    execution::{ExecutionEvent, JobReport, MatrixReport, PublishOutcome, ReleaseDecision},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Create a job progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("PASSED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a job state for display
pub fn format_job_state(state: &JobState, allow_failure: bool) -> String {
    match state {
        JobState::Passed { .. } => style("PASSED").green().to_string(),
        JobState::Failed { .. } if allow_failure => style("FAILED (allowed)").yellow().to_string(),
        JobState::Failed { .. } => style("FAILED").red().to_string(),
        JobState::Cancelled { .. } => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a matrix event for display
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            matrix,
            jobs,
        } => format!(
            "{} Starting matrix {} with {} jobs ({})",
            ROCKET,
            style(matrix).bold(),
            style(jobs).cyan(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::RunSkipped { ref_name, .. } => format!(
            "{} {} is excluded by the branch filter, nothing to do",
            INFO,
            style(ref_name.as_deref().unwrap_or("this ref")).bold()
        ),
        ExecutionEvent::JobStarted { name, .. } => {
            format!("{} {}", SPINNER, style(name).cyan())
        }
        ExecutionEvent::CacheRestored { job, files } => format!(
            "{} {} restored {} cached files",
            INFO,
            style(job).dim(),
            files
        ),
        ExecutionEvent::StepStarted { .. } => return None,
        ExecutionEvent::StepFinished { job, result } => {
            if result.is_success() {
                return None;
            }
            format!(
                "{} {} {} ({})",
                CROSS,
                style(job).dim(),
                style(result.kind).red(),
                result
                    .exit_code
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "no exit code".to_string())
            )
        }
        ExecutionEvent::JobPassed { job } => format!("{} {}", CHECK, style(job).green()),
        ExecutionEvent::JobFailed {
            job,
            error,
            allow_failure,
            ..
        } => {
            if *allow_failure {
                format!(
                    "{} {} failed (allowed): {}",
                    WARN,
                    style(job).yellow(),
                    style(error).dim()
                )
            } else {
                format!("{} {}: {}", CROSS, style(job).red(), style(error).dim())
            }
        }
        ExecutionEvent::JobCancelled { job } => {
            format!("{} {} cancelled", WARN, style(job).yellow())
        }
        ExecutionEvent::ReleaseSkipped { .. } => return None,
        ExecutionEvent::Published { result, .. } => format!(
            "{} Published {} to {}",
            PACKAGE,
            style(result.archive.display()).bold(),
            style(&result.tag).cyan()
        ),
        ExecutionEvent::PublishFailed { job, error } => format!(
            "{} Publishing {} failed: {}",
            CROSS,
            style(job).red(),
            style(error).dim()
        ),
        ExecutionEvent::CacheSaved { job, .. } => {
            format!("{} {} cache saved", INFO, style(job).dim())
        }
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Matrix run ({}) {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// One line per job for the final summary
pub fn format_job_report(report: &JobReport) -> String {
    let mut line = format!(
        "  {:<48} {}",
        report.job.name,
        format_job_state(&report.state, report.job.allow_failure)
    );

    match &report.publish {
        Some(PublishOutcome::Published(result)) => {
            line.push_str(&format!("  {} {}", PACKAGE, style(result.archive.display()).dim()));
        }
        Some(PublishOutcome::Failed(error)) => {
            line.push_str(&format!("  {}", style(format!("publish failed: {}", error)).red()));
        }
        None => {}
    }

    line
}

/// Print the end-of-run summary
pub fn print_report(report: &MatrixReport, show_output: bool) {
    print_separator();
    for job in &report.jobs {
        println!("{}", format_job_report(job));
        if show_output && !job.state.is_passed() {
            if let Some(failed) = job.outcome.failed_step.and_then(|s| job.outcome.result_for(s)) {
                println!("{}", format_output(&failed.output, 20));
            }
        }
    }
    print_separator();
    println!(
        "  {} passed, {} failed, {} cancelled - {}",
        style(report.run.passed_jobs).green(),
        style(report.run.failed_jobs).red(),
        style(report.run.cancelled_jobs).yellow(),
        format_status(report.run.status)
    );
}

/// Describe a job for `expand`
pub fn format_job(job: &Job, release: Option<&ReleaseDecision>) -> String {
    let mut flags = Vec::new();
    if job.allow_failure {
        flags.push("allow_failure");
    }
    if job.disable_tests {
        flags.push("no tests");
    }
    if !job.deploy {
        flags.push("no deploy");
    }

    let mut line = format!("  {:<48} {}", style(&job.name).bold(), style(&job.id).dim());
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }
    if let Some(decision) = release {
        if decision.eligible {
            line.push_str(&format!("  {} release", PACKAGE));
        } else {
            line.push_str(&format!("  {}", style(&decision.reason).dim()));
        }
    }
    line
}

/// Format a history entry for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} - {} ({}/{} passed, {} published)",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.matrix_name).bold(),
        style(&summary.trigger).cyan(),
        format_status(summary.status),
        summary.passed_jobs,
        summary.total_jobs,
        summary.published
    )
}

/// Format step output with truncation, keeping the last lines
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}

/// Print a horizontal rule spanning the terminal width
pub fn print_separator() {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    println!("{}", style("─".repeat(width)).dim());
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
