mod agent;
mod cache;
mod classifier;
mod config;
mod lifecycle;
mod net;
mod notify;
mod offline;
mod strategy;
mod sync;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent::ServiceAgent;
use cache::SqliteStore;
use net::HttpFetcher;
use notify::LoggingHost;

#[derive(Parser, Debug)]
#[command(name = "platesync")]
#[command(about = "Offline caching and sync agent for the Plates meal-planning app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/platesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory for a rolling log file in addition to stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  init_tracing(args.log_dir.as_deref());

  let config = config::AgentConfig::load(args.config.as_deref())?;

  let store = Arc::new(SqliteStore::open(&config.store_path()?)?);
  let fetcher = HttpFetcher::new(&config.backend_url)?;
  let host = Arc::new(LoggingHost);

  let sync_interval = Duration::from_secs(config.sync_interval_secs);
  let agent = ServiceAgent::new(config, store, fetcher, host.clone(), host);

  agent.install().await?;
  agent.activate()?;

  // Periodic connectivity probe stands in for the host's restoration signal
  let mut interval = tokio::time::interval(sync_interval);
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!(pending = agent.pending_mutations()?, "Shutting down");
        break;
      }
      _ = interval.tick() => {
        if agent.pending_mutations()? > 0 {
          agent.on_connectivity().await?;
        }
      }
    }
  }

  Ok(())
}

fn init_tracing(log_dir: Option<&std::path::Path>) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("platesync=info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "platesync.log");
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(appender)
        .with_ansi(false)
        .init();
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    }
  }
}
