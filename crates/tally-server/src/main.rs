//! tally server binary.
//!
//! Reads `tally.toml` (or the path given with `--config`), opens the SQLite
//! analytics store and serves the JSON API under `/api`. With `--ingest` it
//! runs one ingestion pass, prints the report and exits.

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use tally_engine::{Analytics, BusFeed, IngestOptions};
use tally_store_sqlite::{BusDatabase, SqliteStore};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Agent session analytics server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tally.toml")]
  config: PathBuf,

  /// Run one ingestion pass, print the report and exit.
  #[arg(long)]
  ingest: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config.clone()).required(false))
    .add_source(::config::Environment::with_prefix("TALLY"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = server_cfg.store_path();
  let store = SqliteStore::open(&store_path, server_cfg.connection_config())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let analytics = Analytics::new(Arc::new(store), server_cfg.analytics_config());

  match server_cfg.bus_db_path() {
    Some(bus_path) => {
      let bus = BusDatabase::open(&bus_path)
        .await
        .with_context(|| format!("failed to open bus database at {bus_path:?}"))?;
      let analytics = Arc::new(analytics.with_bus(bus));
      if !cli.ingest {
        spawn_bus_poller(Arc::clone(&analytics), &server_cfg);
      }
      run(analytics, &server_cfg, cli.ingest).await
    }
    None => run(Arc::new(analytics), &server_cfg, cli.ingest).await,
  }
}

async fn run<B>(
  analytics: Arc<Analytics<SqliteStore, B>>,
  cfg:       &ServerConfig,
  ingest:    bool,
) -> anyhow::Result<()>
where
  B: BusFeed + 'static,
{
  if ingest {
    let report = analytics
      .ingest(IngestOptions::default())
      .await
      .context("ingestion failed")?;
    let bus = analytics.ingest_bus().await.context("bus ingestion failed")?;
    println!(
      "{}",
      serde_json::to_string_pretty(&serde_json::json!({ "logs": report, "bus": bus }))
        .context("failed to render report")?
    );
    return Ok(());
  }

  let app = Router::new()
    .nest("/api", tally_api::api_router(analytics))
    .layer(TraceLayer::new_for_http());
  let address = cfg.address();

  info!("Listening on http://{address}/api");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Pull new bus events on a fixed interval for the life of the process.
fn spawn_bus_poller<B>(analytics: Arc<Analytics<SqliteStore, B>>, cfg: &ServerConfig)
where
  B: BusFeed + 'static,
{
  let mut ticker = tokio::time::interval(cfg.bus_interval());
  tokio::spawn(async move {
    loop {
      ticker.tick().await;
      if let Err(e) = analytics.ingest_bus().await {
        warn!(error = %e, "bus pull failed");
      }
    }
  });
}
