//! Runnerflow server - webhook intake and demand queries
//!
//! This binary wires the demand pipeline:
//! - Opens the SQLite store and applies the schema
//! - Builds the ingestion pipeline, history resolver and aggregation engine
//! - Spawns the rollup scheduler
//! - Serves the HTTP routes
//!
//! Usage:
//!   cargo run --release --bin runnerflow_server
//!
//! Environment variables:
//!   RUNNERFLOW_DB_PATH - SQLite database path (default: runnerflow.db)
//!   RUNNERFLOW_SCHEMA_DIR - schema directory (default: sql)
//!   PORT - HTTP port (default: 8080)
//!   WEBHOOK_SECRET - webhook signature secret (optional)
//!   ROLLUP_REFRESH_INTERVAL_MS - rollup refresh interval (default: 60000)

use dotenv::dotenv;
use log::{info, warn};
use rusqlite::Connection;
use runnerflow::config::ServerConfig;
use runnerflow::pipeline::{rollup_scheduler_task, AggregationEngine, HistoryResolver, IngestionPipeline};
use runnerflow::server::{router, AppState};
use runnerflow::store::{run_schema_migrations, DemandStore, SqliteDemandStore};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Runnerflow server");

    let config = ServerConfig::from_env()?;

    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Schema dir: {}", config.schema_dir);
    info!("   ├─ Port: {}", config.port);
    info!("   └─ Rollup refresh interval: {}ms", config.rollup_refresh_interval_ms);

    if config.webhook_secret.is_none() {
        warn!("⚠️  WEBHOOK_SECRET not set, webhook signature validation disabled");
    }

    info!("🔧 Initializing database...");
    let sqlite_store = Arc::new(SqliteDemandStore::open(&config.db_path)?);

    let mut conn = Connection::open(&config.db_path)?;
    run_schema_migrations(&mut conn, &config.schema_dir)?;
    drop(conn);
    info!("✅ Database initialized");

    let store: Arc<dyn DemandStore> = sqlite_store.clone();
    let history = Arc::new(HistoryResolver::new(store.clone()));
    let state = Arc::new(AppState {
        ingestion: Arc::new(IngestionPipeline::new(store.clone())),
        aggregation: Arc::new(AggregationEngine::new(store, history)),
        webhook_secret: config.webhook_secret.clone(),
    });

    tokio::spawn(rollup_scheduler_task(
        sqlite_store,
        config.rollup_refresh_interval_ms,
    ));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("✅ Listening on {}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}
