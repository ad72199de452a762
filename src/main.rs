use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use mapstash::cache::{sweep, TierStore};
use mapstash::{logging, Config, HttpFetcher, Request, SqliteStorage, Worker};
use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "mapstash")]
#[command(about = "Tiered offline cache for map clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mapstash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database location, overriding the config file
  #[arg(long)]
  store: Option<PathBuf>,

  /// Mirror logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the shell tier if needed and activate this deployment
  Start,
  /// Send URLs through the cache and report where each answer came from
  Fetch {
    #[arg(required = true)]
    urls: Vec<Url>,
  },
  /// Pre-populate the tile and font tiers
  Warm {
    #[arg(required = true)]
    urls: Vec<Url>,
  },
  /// List persisted tiers with their entry counts
  Tiers,
  /// Run the tile eviction sweep now
  Evict,
  /// Delete one tier, or every tier when none is given
  Clear { tier: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override store location if specified on command line
  let config = if let Some(store) = args.store {
    Config {
      store_path: Some(store),
      ..config
    }
  } else {
    config
  };

  let _guard = logging::init_logging(&logging::default_log_dir()?, args.verbose)?;

  let store = SqliteStorage::open(&config.store_path()?)?;
  let fetcher = HttpFetcher::new(config.request_timeout())?;
  let worker = Worker::new(&config, store, fetcher)?;

  match args.command {
    Command::Start => {
      let deleted = worker.start().await?;
      for name in &deleted {
        println!("deleted  {}", name);
      }
      for name in worker.context().tiers.expected_names() {
        println!("serving  {}", name);
      }
    }
    Command::Fetch { urls } => {
      worker.start().await?;
      for url in urls {
        match worker.handle(Request::get(url.clone())).await {
          Ok(served) => println!(
            "{} {:<11} {:>9}b  {}",
            served.response.status,
            served.source.as_str(),
            served.response.body.len(),
            url
          ),
          Err(e) => println!("ERR {:<11} {:>10}  {}: {}", "-", "-", url, e),
        }
      }
    }
    Command::Warm { urls } => {
      worker.start().await?;
      let results = worker.warm(&urls).await;
      let failed = results.iter().filter(|(_, r)| r.is_err()).count();
      for (url, result) in &results {
        if let Err(e) = result {
          println!("failed  {}: {}", url, e);
        }
      }
      println!("warmed {} of {} urls", results.len() - failed, results.len());
    }
    Command::Tiers => {
      let store = &worker.context().store;
      let expected = worker.context().tiers.expected_names();
      for name in store.list_tier_names()? {
        let count = store.list_keys(&name)?.len();
        let marker = if expected.contains(&name) { "" } else { "  (stale)" };
        println!("{:<12} {:>7}{}", name, count, marker);
      }
    }
    Command::Evict => {
      let tile = &worker.context().tiers.tile;
      let policy = tile
        .eviction_policy()
        .ok_or_else(|| eyre!("Tier {} has no eviction bound", tile.name))?;
      let report = sweep(worker.context().store.as_ref(), &tile.name, &policy)?;
      println!(
        "{}: evicted {} of {} entries",
        tile.name, report.evicted, report.entries_before
      );
    }
    Command::Clear { tier } => {
      let store = &worker.context().store;
      let names = match tier {
        Some(name) => vec![name],
        None => store.list_tier_names()?.into_iter().collect(),
      };
      for name in names {
        if store.delete_tier(&name)? {
          println!("deleted  {}", name);
        } else {
          println!("no such tier  {}", name);
        }
      }
    }
  }

  Ok(())
}
