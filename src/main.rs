//! ==============================================================================
//! main.rs - trap hub entry point
//! ==============================================================================
//!
//! purpose:
//!     small hub that sits between the trap devices and the browser dashboard.
//!     devices POST cumulative detection counters over http; the hub keeps the
//!     latest value per trap, writes every reading to a local sqlite file, and
//!     pushes updates to connected dashboards over a websocket. on top of the
//!     raw readings it serves a per-day report and the 24-bucket hourly
//!     increment report.
//!
//! responsibilities:
//!     - load configuration (traphub.toml)
//!     - open the sqlite database and run migrations
//!     - build shared state (live map + broadcast channel)
//!     - serve the http/websocket api
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                     trap hub (this bin)                  │
//!     │  ┌────────────┐   ┌─────────────┐   ┌────────────────┐   │
//!     │  │ ingest     │──▶│ live state  │──▶│ websocket push │   │
//!     │  │ (http post)│   │ (rwlock map)│   │ (broadcast)    │   │
//!     │  └─────┬──────┘   └─────────────┘   └────────────────┘   │
//!     │        │                                                 │
//!     │        ▼                                                 │
//!     │  ┌────────────┐   ┌──────────────────────────────────┐   │
//!     │  │ sqlite     │──▶│ reports (daily / hourly buckets) │   │
//!     │  └────────────┘   └──────────────────────────────────┘   │
//!     └──────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod aggregate;
mod config;
mod db;
mod domain;
mod server;

use std::path::PathBuf;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Trap Hub - Detection Ingest & Hourly Reporting");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::HubConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: open the database (spawns the worker thread, runs migrations)
    let db = db::Database::open(PathBuf::from(&config.database.path))?;
    tracing::info!("database ready at {}", config.database.path);

    // step 4: shared state and the api
    let state = server::AppState::new(&config, db);
    server::run(&config, state).await
}
