use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use shopworker::config::WorkerConfig;
use shopworker::control::ControlReply;
use shopworker::net::HttpFetcher;
use shopworker::store::{CacheStore, MemoryBackend, SqliteBackend};
use shopworker::sync::Reconciler;
use shopworker::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "shopworker")]
#[command(about = "Offline cache worker for the ShopMart storefront")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shopworker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Write logs to a daily-rolling file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  /// Use a throwaway in-memory store instead of the on-disk cache
  #[arg(long)]
  memory: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the cache and activate the current generation
  Warm,
  /// Print the total number of cached entries
  Size,
  /// Destroy every cache partition
  Clear,
  /// List cache partitions
  Partitions,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let filter = match args.verbose {
    0 => EnvFilter::new("shopworker=warn"),
    1 => EnvFilter::new("shopworker=info"),
    _ => EnvFilter::new("shopworker=debug"),
  };

  // The guard must outlive main so buffered log lines get flushed.
  let _log_guard = match &args.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "shopworker.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt().with_env_filter(filter).init();
      None
    }
  };

  let config = WorkerConfig::load(args.config.as_deref())?;

  let store = if args.memory {
    CacheStore::new(MemoryBackend::new())
  } else {
    CacheStore::new(SqliteBackend::open()?)
  };

  match args.command {
    Command::Warm => warm(config, store).await,
    Command::Size => query(config, store, json!({"type": "GET_CACHE_SIZE"})).await,
    Command::Clear => query(config, store, json!({"type": "CLEAR_CACHE"})).await,
    Command::Partitions => partitions(store).await,
  }
}

/// Install the current generation against the live network and activate it.
async fn warm(config: WorkerConfig, store: CacheStore) -> Result<()> {
  let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);
  let worker = Worker::new(config, store, fetcher, Reconciler::new())?;

  let report = worker.install().await?;
  worker.activate().await?;

  println!("cached {} assets", report.cached.len());
  if !report.failed.is_empty() {
    println!("failed to cache: {}", report.failed.join(", "));
  }
  Ok(())
}

/// Answer a query through the worker's control channel.
async fn query(config: WorkerConfig, store: CacheStore, message: serde_json::Value) -> Result<()> {
  let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);
  let worker = Worker::new(config, store, fetcher, Reconciler::new())?;
  let handle = worker.spawn();

  match handle.control(message).await {
    ControlReply::CacheSize { cache_size } => println!("{} cached entries", cache_size),
    ControlReply::Success { .. } => println!("ok"),
    ControlReply::Error { error } => return Err(color_eyre::eyre::eyre!(error)),
  }
  Ok(())
}

async fn partitions(store: CacheStore) -> Result<()> {
  let names = store.partition_names().await?;
  if names.is_empty() {
    println!("no cache partitions");
    return Ok(());
  }
  for name in names {
    println!("{}", name);
  }
  Ok(())
}
