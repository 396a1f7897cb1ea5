//! Balance Monitor
//!
//! Periodically checks the ADSL and Forge balances of a set of phone numbers, keeps a
//! bounded query history and rolls it up into reports served over a JSON API.

mod balance;
mod clock;
mod config;
mod db;
mod scheduler;
mod web;

use balance::HttpBalanceClient;
use clock::{Clock, SystemClock};
use config::ServerConfig;
use db::{HistoryStore, ReportStore, SqliteStore, Storage};
use scheduler::{QueryOrchestrator, ReportGenerator, Scheduler};
use web::{AppState, DashboardFeed, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("balance_monitor=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Balance Monitor on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize storage
    let storage: Arc<dyn Storage> = Arc::new(SqliteStore::new(&cfg.db_path)?);
    let history = Arc::new(HistoryStore::new(storage.clone()));
    let reports = Arc::new(ReportStore::new(storage));
    history.load();
    reports.load();

    // Wire up the query pipeline
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = Arc::new(HttpBalanceClient::new(cfg.request_timeout(), clock.clone())?);
    let orchestrator = Arc::new(QueryOrchestrator::new(client, clock.clone(), cfg.max_concurrency));
    let reporter = Arc::new(ReportGenerator::new(history.clone(), reports.clone(), clock.clone()));
    let scheduler = Arc::new(Scheduler::new(orchestrator, history.clone(), reporter.clone(), clock));

    let state = AppState {
        scheduler: scheduler.clone(),
        history,
        reports,
        reporter,
        feed: Arc::new(DashboardFeed::default()),
    };

    // Start web server; the scheduler is started through the API
    let server = Server::new(cfg, state);
    server.start().await?;

    scheduler.stop().await;
    Ok(())
}
