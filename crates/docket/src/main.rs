//! Docket: distributed cron jobs over a shared document store
//!
//! Main binary with subcommands:
//! - `demo`: seed a notes collection and run several workers against it
//! - `next`: print upcoming occurrences of a schedule expression

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod demo;

/// Default number of workers polling the demo collection.
const DEFAULT_WORKER_COUNT: usize = 3;

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Distributed cron jobs over a shared document store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed demo jobs and process them with several workers
    Demo {
        /// Number of schedulers sharing the store
        #[arg(long, env = "DOCKET_WORKERS", default_value_t = DEFAULT_WORKER_COUNT)]
        workers: usize,

        /// Scheduler configuration file (JSON)
        #[arg(long, env = "DOCKET_CONFIG")]
        config: Option<PathBuf>,

        /// Wait after an idle tick, in milliseconds
        #[arg(long, env = "DOCKET_IDLE_DELAY_MS")]
        idle_delay_ms: Option<u64>,

        /// Minimum gap between runs of the same job, in milliseconds
        #[arg(long, env = "DOCKET_NEXT_DELAY_MS")]
        next_delay_ms: Option<u64>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long, env = "DOCKET_RUN_FOR")]
        run_for: Option<u64>,
    },

    /// Print the next occurrences of a schedule expression
    Next {
        /// Six or seven field expression, seconds first (quote it)
        #[arg(value_name = "EXPRESSION")]
        expression: String,

        /// Number of occurrences to print
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "docket=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            workers,
            config,
            idle_delay_ms,
            next_delay_ms,
            run_for,
        } => {
            let config = demo::load_config(config.as_deref(), idle_delay_ms, next_delay_ms)?;
            demo::run(workers, config, run_for).await
        }

        Commands::Next { expression, count } => print_next(&expression, count),
    }
}

fn print_next(expression: &str, count: usize) -> Result<()> {
    let schedule = docket_scheduler::ScheduleExpression::parse(expression)
        .map_err(|e| miette::miette!("{}", e))?;

    for at in schedule.upcoming(chrono::Utc::now()).take(count) {
        println!("{}", at.to_rfc3339());
    }
    Ok(())
}
