use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod api;
mod db;
mod entities;
mod error;
mod scanner;
mod services;

use api::AppState;
use scanner::jobs::ScanJobRegistry;
use services::repository::{Repository, SqlRepository};
use services::scheduler::{self, MetricsScheduler};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load env vars
    dotenvy::dotenv().ok();

    // Connect to DB
    let db = match db::connect().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let repo: Arc<dyn Repository> = Arc::new(SqlRepository::new(db));

    // Scan-job registry with its background eviction sweep
    let jobs = Arc::new(ScanJobRegistry::new());
    jobs.spawn_eviction_sweep();

    // Collection + retention schedules
    let interval = match std::env::var("METRICS_COLLECTION_INTERVAL") {
        Ok(value) => match scheduler::resolve_interval(&value) {
            Some((label, _)) => label,
            None => {
                tracing::warn!(
                    "METRICS_COLLECTION_INTERVAL={} is not a known interval, using {}",
                    value,
                    scheduler::DEFAULT_INTERVAL
                );
                scheduler::DEFAULT_INTERVAL
            }
        },
        Err(_) => scheduler::DEFAULT_INTERVAL,
    };
    let metrics_scheduler = Arc::new(MetricsScheduler::new(Arc::clone(&repo), interval));
    metrics_scheduler.start_collection().await;
    metrics_scheduler.start_retention().await;

    let state = AppState {
        repo,
        jobs,
        scheduler: Arc::clone(&metrics_scheduler),
    };

    // CORS Layer
    let cors = CorsLayer::permissive();

    // Build application with routes
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route(
            "/api/routers",
            get(api::routers::list).post(api::routers::create),
        )
        .route("/api/routers/metrics/summary", get(api::routers::summary))
        .route(
            "/api/routers/metrics/config",
            get(api::routers::get_config).post(api::routers::set_config),
        )
        .route(
            "/api/routers/{id}",
            get(api::routers::get_one)
                .put(api::routers::update)
                .delete(api::routers::remove),
        )
        .route(
            "/api/routers/{id}/test-connection",
            post(api::routers::test_connection),
        )
        .route(
            "/api/routers/{id}/collect-metrics",
            post(api::routers::collect_metrics),
        )
        .route("/api/routers/{id}/metrics", get(api::routers::metrics))
        .route("/api/scanner/scan", post(api::scanner::start_scan))
        .route("/api/scanner/scan/{job_id}", get(api::scanner::scan_status))
        .route("/api/scanner/add", post(api::scanner::add_device))
        .route("/api/scanner/add-multiple", post(api::scanner::add_multiple))
        .with_state(state)
        .layer(cors);

    // Run app
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, stopping schedules");
            metrics_scheduler.stop_collection().await;
            metrics_scheduler.stop_retention().await;
        })
        .await
        .unwrap();
}

async fn root() -> Json<Value> {
    Json(json!({
        "system": "wrtfleet",
        "status": "operational",
        "modules": {
            "scanner": "ready",
            "collector": "active",
            "scheduler": "active"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
