use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use orchestra_core::config::Config;
use orchestra_core::git::CliGitOps;
use orchestra_core::orchestrator::Orchestrator;
use orchestra_core::signals;
use orchestra_core::worker::agent::ProcessAgentRunner;

/// Exit code written when a run is interrupted by SIGINT/SIGTERM.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "orchestra",
    version,
    about = "Parallel issue orchestrator",
    long_about = "Drives worktree-isolated workers through a priority-ordered, dependency-aware \
                  backlog of issues, merging each completed branch into trunk one at a time."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process issues one at a time, in priority/dependency order
    Sequential(RunArgs),

    /// Process issues with a bounded worker pool, merging sequentially
    Parallel(RunArgs),

    /// Plan and run a sprint: dependency waves refined by file contention
    Sprint(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Path to the repository to orchestrate (defaults to the current directory)
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Path to a JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the planned waves without launching any workers
    #[arg(long)]
    pub dry_run: bool,

    /// Resume from a previously persisted state file
    #[arg(long)]
    pub resume: bool,

    /// Maximum concurrent workers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Per-issue implementation timeout, in seconds (overrides config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Restrict the run to these issue ids
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Exclude these issue ids from the run
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Include P0 issues even when otherwise restricted by --only
    #[arg(long)]
    pub include_p0: bool,

    /// Base directory under which worktrees are created (overrides config)
    #[arg(long)]
    pub worktree_base: Option<PathBuf>,

    /// Stream agent stdout/stderr to the terminal as it runs
    #[arg(long)]
    pub stream_output: bool,

    /// Command used to invoke the coding agent (e.g. `claude`)
    #[arg(long, default_value = "claude")]
    pub agent_command: String,
}

/// Load config, apply CLI overrides, and run the orchestrator in sequential
/// or parallel mode.
pub fn run(args: RunArgs) -> Result<i32> {
    run_with_mode(args, false)
}

/// Load config, apply CLI overrides, and run the orchestrator in sprint
/// mode: dependency waves refined by file-contention sub-waves.
pub fn run_sprint(args: RunArgs) -> Result<i32> {
    run_with_mode(args, true)
}

fn run_with_mode(args: RunArgs, sprint_mode: bool) -> Result<i32> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    config.automation.dry_run = args.dry_run;
    config.automation.resume = args.resume;
    config.automation.sprint_mode = sprint_mode;
    config.automation.only = args.only.clone();
    config.automation.skip = args.skip.clone();
    config.automation.include_p0 = args.include_p0;
    if let Some(workers) = args.workers {
        config.parallel.max_workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.parallel.implementation_timeout_secs = timeout;
    }
    if let Some(base) = &args.worktree_base {
        config.parallel.worktree_base_dir = base.to_string_lossy().to_string();
    }

    if config.automation.dry_run {
        log::info!("dry run requested; planning only, no workers will be launched");
    }

    let shutdown = signals::install()?;
    let git = CliGitOps;
    let agent = ProcessAgentRunner::new(args.agent_command.clone(), Vec::new());

    let orchestrator = Orchestrator::new(git, agent, config, args.repo.clone(), shutdown);
    let summary = orchestrator.run()?;

    log::info!(
        "run finished: {} completed, {} failed{}",
        summary.completed.len(),
        summary.failed.len(),
        if summary.interrupted { " (interrupted)" } else { "" }
    );

    if summary.interrupted {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(if summary.failed.is_empty() { 0 } else { 1 })
}
