//! certharvest CLI — worker daemon plus operator commands against the queue.

use std::time::Duration;

use certharvest::classify::RegexClassifier;
use certharvest::config::Config;
use certharvest::db::Db;
use certharvest::fetch::BrowserFetcher;
use certharvest::media::{MediaPipeline, create_store};
use certharvest::model::CertId;
use certharvest::worker::{Worker, WorkerConfig};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "certharvest", about = "Distributed certificate-image harvester")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker loop until stopped or the item budget is spent
    Run,
    /// Pre-seed a contiguous cert range as pending work
    Seed {
        /// First cert id, inclusive
        from: i64,
        /// Last cert id, inclusive
        to: i64,
    },
    /// Route error/stale/orphaned items back to pending
    Requeue {
        /// Only touch rows stuck longer than this
        #[arg(long, default_value_t = 600)]
        older_than_secs: u64,
    },
    /// Show the queue's status distribution
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config = Config::from_env()?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let cli = Cli::parse();
    match cli.command {
        Command::Run => cmd_run(db, config).await,
        Command::Seed { from, to } => cmd_seed(&db, from, to).await,
        Command::Requeue { older_than_secs } => {
            cmd_requeue(&db, Duration::from_secs(older_than_secs)).await
        }
        Command::Stats => cmd_stats(&db).await,
    }
}

async fn cmd_run(db: Db, config: Config) -> anyhow::Result<()> {
    let store = create_store(&config.storage_bucket)?;
    let pipeline = MediaPipeline::new(store, config.storage_root.clone(), config.fetch_timeout)?;
    let fetcher = BrowserFetcher::new(config.cert_page_base.clone(), config.fetch_timeout);
    let classifier = RegexClassifier::new();

    let mut worker = Worker::new(
        db,
        fetcher,
        classifier,
        pipeline,
        WorkerConfig::from(&config),
    );

    let shutdown = worker.shutdown_notify();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.notify_one();
    });

    worker.run().await?;
    Ok(())
}

async fn cmd_seed(db: &Db, from: i64, to: i64) -> anyhow::Result<()> {
    anyhow::ensure!(from <= to, "seed range is empty: {from} > {to}");
    let inserted = db.seed_range(CertId(from), CertId(to)).await?;
    println!("Seeded {inserted} new pending item(s) in {from}..={to}");
    Ok(())
}

async fn cmd_requeue(db: &Db, cooldown: Duration) -> anyhow::Result<()> {
    let requeued = db.requeue_stale_and_errors(cooldown).await?;
    println!(
        "Requeued {requeued} item(s) stuck longer than {}s",
        cooldown.as_secs()
    );
    Ok(())
}

async fn cmd_stats(db: &Db) -> anyhow::Result<()> {
    let counts = db.status_counts().await?;
    if counts.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("{:<14}COUNT", "STATUS");
    println!("{}", "-".repeat(24));
    let mut total = 0;
    for (status, count) in &counts {
        println!("{:<14}{count}", status.to_string());
        total += count;
    }
    println!("\n{total} item(s) total");
    Ok(())
}
