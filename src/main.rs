use anyhow::{Context, Result};
use buildmatrix::cli::commands::{ExpandCommand, HistoryCommand, RunCommand, ValidateCommand};
use buildmatrix::cli::output::*;
use buildmatrix::cli::{Cli, Command};
use buildmatrix::core::config::MatrixConfig;
use buildmatrix::core::Trigger;
use buildmatrix::execution::{
    EngineOptions, ExecutionEngine, ExecutionEvent, ReleaseGate, ShellExecutor,
};
use buildmatrix::persistence::cache::{CacheManager, FsCacheStore};
use buildmatrix::persistence::{create_summary, PersistenceBackend, RunSummary};
use buildmatrix::publish::{ArtifactPublisher, CommandReleaseHost, Credentials};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let exit_code = match &cli.command {
        Command::Run(cmd) => run_matrix(cmd).await?,
        Command::Validate(cmd) => validate_matrix(cmd)?,
        Command::Expand(cmd) => expand_matrix(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run_matrix(cmd: &RunCommand) -> Result<i32> {
    let config = MatrixConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load matrix {}", cmd.file))?;
    let plan = config.to_plan()?;

    println!(
        "{} Loaded matrix: {} ({} jobs)",
        INFO,
        style(&plan.name).bold(),
        style(plan.jobs.len()).cyan()
    );

    for warning in ReleaseGate::new(plan.release_channel.clone()).coverage_warnings(&plan.jobs) {
        warn!("{}", warning);
    }

    let trigger = Trigger::detect(cmd.tag.clone(), cmd.branch.clone());
    info!("Trigger: {}", trigger);

    let workspace = std::env::current_dir().context("Failed to read working directory")?;
    let options = EngineOptions {
        build_root: workspace.join(&cmd.build_root),
        workspace: workspace.clone(),
        strategy: cmd.strategy,
    };

    let mut engine = ExecutionEngine::new(ShellExecutor::new(), options);

    if plan.cache.enabled && !cmd.no_cache {
        let store = match &plan.cache.dir {
            Some(dir) => FsCacheStore::new(workspace.join(dir)),
            None => FsCacheStore::with_default_path(),
        };
        info!("Build cache at {}", store.root().display());
        engine = engine.with_cache(CacheManager::new(store, plan.cache.version.clone()));
    }

    if let Some(deploy) = &plan.deploy {
        let host = CommandReleaseHost::new(
            Arc::new(ShellExecutor::new()),
            deploy.upload.clone(),
            workspace.clone(),
        );
        let publisher = ArtifactPublisher::new(
            deploy.clone(),
            workspace.join(&cmd.staging_dir),
            Arc::new(host),
        )
        .with_crate_name(plan.crate_name.clone())
        .with_workspace(workspace.clone());
        engine = engine.with_publisher(publisher);

        if trigger.is_tag() {
            match Credentials::from_env(&deploy.token_env) {
                Ok(credentials) => engine = engine.with_credentials(credentials),
                Err(e) => warn!("{}; release uploads will fail", e),
            }
        }
    }

    let progress = create_progress_bar(plan.jobs.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let Some(line) = format_execution_event(&event) {
            bar.println(line);
        }
        if matches!(
            event,
            ExecutionEvent::JobPassed { .. }
                | ExecutionEvent::JobFailed { .. }
                | ExecutionEvent::JobCancelled { .. }
        ) {
            bar.inc(1);
        }
    });

    let canceller = engine.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling all jobs");
            canceller.cancel_all();
        }
    });

    let report = engine.execute(&plan, &trigger).await?;
    progress.finish_and_clear();

    if !report.jobs.is_empty() {
        print_report(&report, cmd.show_output);
    }

    if !cmd.no_history {
        let store = open_history().await?;
        let summary = create_summary(&report);
        store.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    let exit_code = report.exit_code();
    if exit_code == 0 {
        println!(
            "\n{} {} {}",
            CHECK,
            style(&plan.name).bold(),
            style("passed").green()
        );
    } else {
        println!("\n{} {} {}", CROSS, style(&plan.name).bold(), style("failed").red());
    }

    Ok(exit_code)
}

fn validate_matrix(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating matrix...", INFO);

    match MatrixConfig::from_file(&cmd.file) {
        Ok(config) => {
            let plan = config.to_plan()?;
            println!("{} Matrix document is valid!", CHECK);
            println!("  Name: {}", style(&plan.name).bold());
            println!("  Jobs: {}", style(plan.jobs.len()).cyan());
            println!("  Release channel: {}", style(&plan.release_channel).cyan());

            for warning in ReleaseGate::new(plan.release_channel.clone()).coverage_warnings(&plan.jobs) {
                println!("  {} {}", WARN, style(warning).yellow());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(1)
        }
    }
}

fn expand_matrix(cmd: &ExpandCommand) -> Result<i32> {
    let config = MatrixConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load matrix {}", cmd.file))?;
    let plan = config.to_plan()?;

    let gate = ReleaseGate::new(plan.release_channel.clone());
    let trigger = cmd.tag.as_ref().map(Trigger::tag);
    let decisions: Vec<_> = plan
        .jobs
        .iter()
        .map(|job| trigger.as_ref().map(|t| gate.decide(job, t)))
        .collect();

    if cmd.json {
        let jobs: Vec<_> = plan
            .jobs
            .iter()
            .zip(&decisions)
            .map(|(job, decision)| serde_json::json!({ "job": job, "release": decision }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(0);
    }

    println!(
        "{} {} expands to {} jobs:",
        INFO,
        style(&plan.name).bold(),
        style(plan.jobs.len()).cyan()
    );
    for (job, decision) in plan.jobs.iter().zip(&decisions) {
        println!("{}", format_job(job, decision.as_ref()));
    }

    Ok(0)
}

async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(
            buildmatrix::persistence::SqliteRunStore::with_default_path().await?,
        ))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        warn!("Built without sqlite; history is kept in memory only");
        Ok(Arc::new(buildmatrix::persistence::InMemoryPersistence::new()))
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(0);
    }

    let runs = match &cmd.matrix {
        Some(name) => store.list_runs(name).await?,
        None => {
            let mut all_runs = Vec::new();
            for name in store.list_matrices().await? {
                all_runs.extend(store.list_runs(&name).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    let runs: Vec<RunSummary> = runs.into_iter().take(cmd.limit).collect();

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(0);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(0)
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Matrix: {}", style(&summary.matrix_name).bold());
    println!("  Trigger: {}", summary.trigger);
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Jobs: {} passed, {} failed of {}",
        style(summary.passed_jobs).green(),
        style(summary.failed_jobs).red(),
        summary.total_jobs
    );
    println!("  Published: {}", summary.published);
    println!("  Exit code: {}", summary.exit_code);

    Ok(())
}
