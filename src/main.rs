//! Mehrhof - multi-worktree orchestrator for AI-assisted development tasks.
//!
//! Each CLI invocation is an independent process: it resolves the active
//! task from the working directory, takes the per-task lock, drives one
//! state machine operation, and exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use mehrhof::{Conductor, Config, GitVcs, TaskView, Workspace};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Multi-worktree orchestrator for AI-assisted development tasks
#[derive(Parser)]
#[command(name = "mehrhof")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Operate on this task id instead of resolving from the working
    /// directory
    #[arg(short, long, global = true)]
    task: Option<Uuid>,

    /// Seconds to wait for the task lock
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a workspace in the current repository
    Init,

    /// Start a task from a work-unit reference (e.g. github:142)
    Start {
        /// Work-unit reference (`provider:key`, or a bare key)
        reference: String,
    },

    /// Transition the task into planning (drafts a specification)
    Plan,

    /// Transition the task into implementing (runs the quality-retry loop)
    Implement,

    /// Transition the task into reviewing (records a verdict)
    Review,

    /// Transition the task to done (merge, pull request, provider update)
    Finish,

    /// Abandon the task
    Abandon,

    /// Restore the previous checkpoint
    Undo,

    /// Restore the next checkpoint
    Redo,

    /// Show the task's status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List all tasks
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete a task and its artifacts
    Delete {
        /// Task id to delete
        id: Uuid,
    },

    /// Show discovered plugins and their availability
    Plugins,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // The first interrupt lets the in-flight step fail on its own so the
    // scoped lock guards run; the second one force-quits.
    ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        tracing::warn!("interrupt received; finishing the current step (press again to force quit)");
    })
    .context("failed to install interrupt handler")?;

    match cli.command {
        Commands::Init => init_workspace(),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "mehrhof", &mut io::stdout());
            Ok(())
        }
        command => run(command, cli.task, cli.timeout),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "mehrhof=debug" } else { "mehrhof=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn init_workspace() -> Result<()> {
    let cwd = std::env::current_dir()?;
    // Anchor the workspace at the repository root when inside one.
    let root = GitVcs::open(&cwd).map_or(cwd, |git| git.root().to_path_buf());

    let workspace = Workspace::init(&root)?;
    Config::default().save(&workspace.config_path())?;
    println!("Initialized mehrhof workspace at {}", workspace.data_dir().display());
    Ok(())
}

fn run(command: Commands, task: Option<Uuid>, timeout: Option<u64>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let mut conductor = Conductor::open(&cwd)?;
    if let Some(secs) = timeout {
        conductor.set_lock_timeout(Duration::from_secs(secs));
    }

    match command {
        Commands::Start { reference } => {
            let task = conductor.start(&reference)?;
            println!("Started task {} ({})", task.short_id(), task.source.title);
            println!("  branch: {}", task.branch);
            if let Some(ref worktree) = task.worktree {
                println!("  worktree: {}", worktree.display());
            }
            Ok(())
        }
        Commands::Plan => transition(&conductor, task, &cwd, Conductor::plan),
        Commands::Implement => transition(&conductor, task, &cwd, Conductor::implement),
        Commands::Review => transition(&conductor, task, &cwd, Conductor::review),
        Commands::Finish => transition(&conductor, task, &cwd, Conductor::finish),
        Commands::Abandon => transition(&conductor, task, &cwd, Conductor::abandon),
        Commands::Undo => {
            let id = conductor.resolve_task(&cwd, task)?;
            let restored = conductor.undo(id)?;
            println!("Restored checkpoint; task is back in {}", restored.phase);
            Ok(())
        }
        Commands::Redo => {
            let id = conductor.resolve_task(&cwd, task)?;
            let restored = conductor.redo(id)?;
            println!("Restored checkpoint; task is in {}", restored.phase);
            Ok(())
        }
        Commands::Status { format } => {
            let id = conductor.resolve_task(&cwd, task)?;
            let view = conductor.status(id)?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_status(&view);
            }
            Ok(())
        }
        Commands::List { format } => {
            let views = conductor.list()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else if views.is_empty() {
                println!("No tasks. Start one with: mehrhof start <ref>");
            } else {
                for view in &views {
                    println!(
                        "{}  {:<13} {}:{}  {}",
                        &view.id.to_string()[..8],
                        view.phase,
                        view.provider,
                        view.key,
                        view.title
                    );
                }
            }
            Ok(())
        }
        Commands::Delete { id } => {
            conductor.delete(id)?;
            println!("Deleted task {id}");
            Ok(())
        }
        Commands::Plugins => {
            let statuses = conductor.plugins();
            if statuses.is_empty() {
                println!("No plugins discovered.");
            } else {
                for status in statuses {
                    let availability = if status.available { "available" } else { "unavailable" };
                    println!("{:<20} {:<10} {}", status.name, status.kind, availability);
                }
            }
            Ok(())
        }
        Commands::Init | Commands::Completions { .. } => unreachable!("handled in main"),
    }
}

fn transition<F>(
    conductor: &Conductor,
    task: Option<Uuid>,
    cwd: &std::path::Path,
    op: F,
) -> Result<()>
where
    F: Fn(&Conductor, Uuid) -> std::result::Result<mehrhof::TransitionOutcome, mehrhof::ConductorError>,
{
    let id = conductor.resolve_task(cwd, task)?;
    let outcome = op(conductor, id)?;
    println!("Task moved {} -> {}", outcome.from, outcome.to);
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

fn print_status(view: &TaskView) {
    println!("Task {}", view.id);
    println!("  title:          {}", view.title);
    println!("  source:         {}:{}", view.provider, view.key);
    println!("  phase:          {}", view.phase);
    println!("  branch:         {}", view.branch);
    if let Some(ref worktree) = view.worktree {
        println!("  worktree:       {}", worktree.display());
    }
    println!("  specifications: {}", view.specifications);
    println!("  reviews:        {}", view.reviews);
    println!(
        "  checkpoints:    {} (cursor at {})",
        view.checkpoints, view.checkpoint_cursor
    );
    if view.quality_retries > 0 {
        println!("  quality retries: {}", view.quality_retries);
    }
    if let Some(ref holder) = view.locked_by {
        println!("  locked by:      {holder}");
    }
}
