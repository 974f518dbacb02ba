//! flightdeck CLI - single-flight background task runner
//!
//! Main entry point for the flightdeck command-line tool.

use clap::{Parser, Subcommand};
use flightdeck::cli::{self, RunArgs};
use flightdeck::{logging, Database, Scheduler, VersionInfo};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "flightdeck")]
#[command(about = "flightdeck - Single-flight background task runner", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Database file, overriding the configured path
    #[arg(long, global = true, env = "FLIGHTDECK_DB")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program once per subject as a background task and follow it
    Run {
        /// Task category; only one live task per category
        #[arg(short, long)]
        category: String,
        /// Subject to process (repeatable)
        #[arg(short, long = "subject", required = true)]
        subjects: Vec<String>,
        /// Process subjects in parallel with this many workers (0 = configured default)
        #[arg(short, long)]
        parallel: Option<usize>,
        /// Task parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
        /// Print the final task as JSON
        #[arg(long)]
        json: bool,
        /// Program and arguments; `{subject}` is replaced per unit
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show a task
    Status {
        /// Task ID
        id: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recent tasks
    List {
        /// Only tasks in this category
        #[arg(short, long)]
        category: Option<String>,
        /// Only pending or running tasks
        #[arg(short, long)]
        running: bool,
        /// Maximum number of tasks (default from configuration)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Request cancellation of a task
    Cancel {
        /// Task ID
        id: String,
    },

    /// Delete finished tasks older than the retention window
    Cleanup {
        /// Age in days (default from configuration)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Show or manage run history
    History {
        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,
        #[command(subcommand)]
        action: Option<HistoryCommands>,
    },

    /// Show run history statistics and task counts
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark live tasks left behind by a crashed process as failed
    Recover,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Show one history record with its results
    Show {
        /// Record ID
        id: i64,
    },
    /// Delete a history record
    Delete {
        /// Record ID
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", VersionInfo::current());
        return Ok(());
    }

    let mut config = flightdeck::config::load_config().await?;
    if let Some(path) = cli.database {
        // A path given on the command line is relative to the working directory
        config.database.path = std::env::current_dir()?.join(path).to_string_lossy().into_owned();
    }

    logging::init_logging(&config.logging);

    // Other flightdeck processes may own live rows in the same database, so
    // orphan reaping only happens on an explicit `recover`
    let db = Arc::new(Database::new(config.database_path()).await?);
    let scheduler = Scheduler::new(db, &config);

    match cli.command {
        Commands::Run {
            category,
            subjects,
            parallel,
            params,
            json,
            command,
        } => {
            let args = RunArgs {
                category,
                subjects,
                parallel,
                params,
                command,
                json,
            };
            cli::task::handle_run(&scheduler, args).await?;
        }
        Commands::Status { id, json } => {
            cli::task::handle_status(&scheduler, id, json).await?;
        }
        Commands::List {
            category,
            running,
            limit,
        } => {
            cli::task::handle_list(&scheduler, category, running, limit).await?;
        }
        Commands::Cancel { id } => {
            cli::task::handle_cancel(&scheduler, id).await?;
        }
        Commands::Cleanup { days } => {
            cli::task::handle_cleanup(&scheduler, days).await?;
        }
        Commands::History { limit, action } => match action {
            None => cli::history::handle_history(&scheduler, limit).await?,
            Some(HistoryCommands::Show { id }) => cli::history::handle_show(&scheduler, id).await?,
            Some(HistoryCommands::Delete { id }) => cli::history::handle_delete(&scheduler, id).await?,
        },
        Commands::Stats { json } => {
            cli::history::handle_stats(&scheduler, json).await?;
        }
        Commands::Recover => {
            cli::task::handle_recover(&scheduler).await?;
        }
        Commands::Version => {}
    }

    Ok(())
}
