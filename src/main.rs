use std::sync::Arc;

use anyhow::Context;
use backend::{BookQueue, SqliteBookStore, SqliteKeyValueStore};
use clap::Parser;
use othello_board::NormalizedPosition;
use othello_book::config::WorkArgs;
use othello_book::{Book, Cli, Command, Worker};
use solver_driver::SolverDriver;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = SqliteBookStore::connect(&cli.database_url)
        .await
        .with_context(|| format!("failed to open book at {}", cli.database_url))?;
    // Queue, leases and the refill lock live next to the book, so every
    // process opened on this database shares them
    let kv = SqliteKeyValueStore::from_pool(store.pool().clone()).await?;
    let queue = BookQueue::new(cli.queue.book_config()?, Arc::new(kv), Arc::new(store));

    match cli.command {
        Command::Seed { max_discs } => {
            let inserted = queue.seed(max_discs).await?;
            println!("Added {inserted} positions with at most {max_discs} discs");
        }
        Command::Stats => print_stats(&queue).await?,
        Command::Work(args) => work(queue, &args).await?,
        Command::Lookup { position } => {
            let position = NormalizedPosition::from_hex(&position)
                .with_context(|| format!("not a canonical position: {position}"))?;
            let book = Book::new(queue);
            match book.lookup(position).await? {
                Some(evaluation) => println!("{}", serde_json::to_string_pretty(&evaluation)?),
                None => println!("{position} is not in the book"),
            }
        }
    }

    Ok(())
}

async fn print_stats(queue: &BookQueue) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    println!("{:>5} {:>5} {:>10}", "discs", "level", "positions");
    for (discs, level, count) in stats.rows() {
        println!("{discs:>5} {level:>5} {count:>10}");
    }
    println!("{} positions, learnable disc counts: {:?}", stats.total(), stats.learnable_disc_counts());
    Ok(())
}

async fn work(queue: BookQueue, args: &WorkArgs) -> anyhow::Result<()> {
    let driver = SolverDriver::new(args.solver_config());
    let mut worker =
        Worker::new(queue, driver, args.retry_delay()).with_hostname(args.hostname.clone());

    let kill = worker.kill_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping solver");
            kill.kill();
        }
    });

    let summary = worker.run(args.max_jobs).await?;
    info!(
        submitted = summary.submitted,
        abandoned = summary.abandoned,
        failed = summary.failed,
        "work finished"
    );
    Ok(())
}
