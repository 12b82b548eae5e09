mod cache;
mod catalog;
mod config;
mod events;
mod logging;
mod status;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use cache::{CacheResult, PersistentCache};
use catalog::{CatalogService, Focaccia, FocacciaCreate, HttpCatalogClient};
use events::EventBus;
use status::StatusMonitor;

#[derive(Parser, Debug)]
#[command(name = "crosti")]
#[command(about = "Offline-tolerant client for the focaccia catalog API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/crosti/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Catalog API base URL (overrides config and CROSTI_BASE_URL)
  #[arg(long)]
  base_url: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Enable debug logging
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List every item in the catalog
  List,
  /// List featured items
  Featured,
  /// List the first N items
  Batch {
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Show a single item
  Get { id: u64 },
  /// Create an item from a JSON file
  Create {
    #[arg(short, long)]
    file: PathBuf,
  },
  /// Replace an item with the contents of a JSON file
  Update {
    id: u64,
    #[arg(short, long)]
    file: PathBuf,
  },
  /// Delete an item
  Delete { id: u64 },
  /// Show what the cache currently holds
  CacheInfo,
  /// Drop cached data and refetch the list and featured items
  Refresh,
  /// Drop cached data, keeping the offline fallback copies
  Clear,
  /// Drop the offline fallback copies
  ClearFallback,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }

  let log_file = args.log_file.as_deref().or(config.logging.file.as_deref());
  let _log_guard = logging::init(log_file, args.verbose)?;

  let bus = Arc::new(EventBus::new());
  let storage = cache::open_storage(&config.cache);

  let cache = Arc::new(
    PersistentCache::new(storage, Arc::clone(&bus))
      .with_ttl(chrono::Duration::minutes(config.cache.ttl_minutes)),
  );
  debug!(ttl_minutes = cache.ttl().num_minutes(), base_url = %config.api.base_url, "Cache ready");
  let api = Arc::new(HttpCatalogClient::new(&config.api)?);
  let service = CatalogService::new(api, Arc::clone(&cache), Arc::clone(&bus))
    .with_timeout(config.api.timeout());

  let monitor = StatusMonitor::attach(
    Arc::clone(&bus),
    service.server_status(),
    config.status.banner_duration(),
  );

  let outcome = run(&service, args.command).await;
  service.settle(config.api.timeout()).await;
  report_status(&monitor);
  outcome
}

fn report_status(monitor: &StatusMonitor) {
  if monitor.is_server_active() {
    return;
  }
  let Some(banner) = monitor.banner() else {
    return;
  };

  let showing_saved = monitor.is_server_hibernating() && monitor.is_using_cache();
  match banner.sub_text {
    Some(sub) if showing_saved => eprintln!("[{}] {} {}", banner.status, banner.text, sub),
    _ if monitor.has_server_error() => eprintln!("[{}] {} (nothing saved to show)", banner.status, banner.text),
    _ => eprintln!("[{}] {}", banner.status, banner.text),
  }
}

async fn run(service: &CatalogService, command: Command) -> Result<()> {
  match command {
    Command::List => print_read(service.list().await?),
    Command::Featured => print_read(service.list_featured().await?),
    Command::Batch { limit } => print_read(service.list_batch(limit).await?),
    Command::Get { id } => print_read(service.get_by_id(id).await?),
    Command::Create { file } => {
      let item: FocacciaCreate = read_json(&file)?;
      print_json(&service.create(&item).await?)
    }
    Command::Update { id, file } => {
      let item: Focaccia = read_json(&file)?;
      if item.id != id {
        return Err(eyre!("Item id {} in {} does not match {}", item.id, file.display(), id));
      }
      print_json(&service.update(id, &item).await?)
    }
    Command::Delete { id } => print_json(&service.delete(id).await?),
    Command::CacheInfo => print_json(&service.cache_info()),
    Command::Refresh => {
      service.force_refresh().await?;
      print_json(&service.cache_info())
    }
    Command::Clear => {
      service.clear_cache();
      eprintln!("Cache cleared");
      Ok(())
    }
    Command::ClearFallback => {
      service.clear_fallback_cache();
      eprintln!("Fallback cache cleared");
      Ok(())
    }
  }
}

fn print_read<T: Serialize>(result: CacheResult<T>) -> Result<()> {
  if result.is_stale() {
    eprintln!("Server unreachable, showing saved data");
  }
  print_json(result.data())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let out = serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", out);
  Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents).map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))
}
