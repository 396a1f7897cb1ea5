//! JSON API consumed by the dashboard.

mod handlers;

use crate::config::ServerConfig;
use crate::db::{HistoryStore, QueryResult, Report, ReportStore};
use crate::scheduler::{ReportGenerator, Scheduler, SchedulerObserver};

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Latest timer output, kept for dashboard polling.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub last_results: Option<Vec<QueryResult>>,
    pub last_report: Option<Report>,
}

/// Scheduler observer that remembers the last batch and report it was handed.
#[derive(Default)]
pub struct DashboardFeed {
    inner: RwLock<FeedSnapshot>,
}

impl DashboardFeed {
    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SchedulerObserver for DashboardFeed {
    fn on_query_complete(&self, results: &[QueryResult]) {
        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            "Query completed: {} numbers, {} with failures",
            results.len(),
            failed
        );
        self.inner.write().unwrap_or_else(|e| e.into_inner()).last_results = Some(results.to_vec());
    }

    fn on_report_generated(&self, report: &Report) {
        tracing::info!("Report generated: {}", report.title);
        self.inner.write().unwrap_or_else(|e| e.into_inner()).last_report = Some(report.clone());
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub history: Arc<HistoryStore>,
    pub reports: Arc<ReportStore>,
    pub reporter: Arc<ReportGenerator>,
    pub feed: Arc<DashboardFeed>,
}

/// Web server for the balance monitor.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = routes(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Build the router with all routes.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::handle_status))
        .route("/api/feed", get(handlers::handle_feed))
        .route("/api/scheduler/start", post(handlers::handle_start))
        .route("/api/scheduler/stop", post(handlers::handle_stop))
        .route("/api/scheduler/numbers", post(handlers::handle_update_numbers))
        .route("/api/scheduler/run", post(handlers::handle_run_now))
        .route("/api/query", post(handlers::handle_query))
        .route("/api/history", get(handlers::handle_get_history))
        .route("/api/history", delete(handlers::handle_clear_history))
        .route("/api/history/latest", get(handlers::handle_latest_batch))
        .route("/api/reports", get(handlers::handle_get_reports))
        .route("/api/reports", post(handlers::handle_generate_report))
        .route("/api/reports", delete(handlers::handle_clear_reports))
        .route("/api/reports/latest", get(handlers::handle_latest_report))
        .route("/api/reports/{id}", delete(handlers::handle_delete_report))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}
