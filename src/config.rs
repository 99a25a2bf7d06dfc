//! Command line and environment configuration
//!
//! Every option can also come from the environment (or a `.env` file,
//! loaded before parsing).

use std::path::PathBuf;
use std::time::Duration;

use backend::{BackendResult, BookConfig};
use clap::{Args, Parser, Subcommand};
use solver_driver::SolverConfig;

#[derive(Parser, Debug)]
#[command(name = "othello-book", version, about = "Distributed Othello opening book")]
pub struct Cli {
    /// SQLite database holding the book
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:book.db")]
    pub database_url: String,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add every position up to a disc count to the book
    Seed {
        #[arg(long, default_value_t = 8)]
        max_discs: u32,
    },
    /// Print positions per disc count and level
    Stats,
    /// Evaluate queued positions with the solver until stopped
    Work(WorkArgs),
    /// Print the book evaluation of a position given as 32 hex digits
    Lookup { position: String },
}

/// Queue tuning shared by all subcommands
#[derive(Args, Debug, Clone)]
pub struct QueueArgs {
    /// Positions queued per refill
    #[arg(long, env = "BATCH_SIZE", default_value_t = 1000)]
    pub batch_size: usize,

    #[arg(long, env = "QUEUE_TTL_SECS", default_value_t = 600)]
    pub queue_ttl_secs: u64,

    #[arg(long, env = "REFILL_LOCK_TTL_SECS", default_value_t = 60)]
    pub refill_lock_ttl_secs: u64,

    #[arg(long, env = "LEASE_TTL_SECS", default_value_t = 300)]
    pub lease_ttl_secs: u64,

    #[arg(long, env = "REFILL_TIMEOUT_SECS", default_value_t = 30)]
    pub refill_timeout_secs: u64,
}

impl QueueArgs {
    pub fn book_config(&self) -> BackendResult<BookConfig> {
        let config = BookConfig {
            batch_size: self.batch_size,
            queue_ttl: Duration::from_secs(self.queue_ttl_secs),
            refill_lock_ttl: Duration::from_secs(self.refill_lock_ttl_secs),
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            refill_timeout: Duration::from_secs(self.refill_timeout_secs),
            ..BookConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct WorkArgs {
    /// Solver executable
    #[arg(long, env = "SOLVER_PATH")]
    pub solver: PathBuf,

    /// Working directory for the solver, where its data files live
    #[arg(long, env = "SOLVER_DIR")]
    pub solver_dir: Option<PathBuf>,

    /// Extra arguments passed to the solver
    #[arg(long = "solver-arg", allow_hyphen_values = true)]
    pub solver_args: Vec<String>,

    /// Wait before asking again when no job is available
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Name this worker reports when registering
    #[arg(long, env = "HOSTNAME", default_value = "worker")]
    pub hostname: String,

    /// Stop after this many submitted jobs
    #[arg(long)]
    pub max_jobs: Option<u64>,
}

impl WorkArgs {
    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            binary: self.solver.clone(),
            extra_args: self.solver_args.clone(),
            working_dir: self.solver_dir.clone(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
