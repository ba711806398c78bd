// Main entry point for the batch image-translation compositor

use canvas_translate::{
    core::{types::*, Config},
    orchestration::PipelineOrchestrator,
    utils::Metrics,
};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<PipelineOrchestrator>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "canvas_translate={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== CANVAS TRANSLATE ===");
    info!(
        "Config: products={} delay={}ms work_dir={} output_dir={}",
        config.max_concurrent_products(),
        config.pipeline.submission_delay_ms,
        config.work_dir().display(),
        config.output_dir().display()
    );

    tokio::fs::create_dir_all(config.output_dir())
        .await
        .with_context(|| format!("Failed to create {}", config.output_dir().display()))?;

    let metrics = Metrics::new();

    info!("Initializing pipeline orchestrator...");
    let orchestrator = Arc::new(PipelineOrchestrator::new(&config, metrics.clone())?);
    let state = AppState {
        orchestrator,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/process", post(process_products))
        .with_state(state)
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /          - Root endpoint");
    info!("  GET  /health    - Health check");
    info!("  GET  /metrics   - Prometheus metrics");
    info!("  GET  /stats     - Detailed statistics");
    info!("  POST /process   - Translate product images (JSON)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Canvas Translate - batch image-translation compositor"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Json<canvas_translate::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Process products endpoint
///
/// Body: JSON array of `ProductImageSet`. Responds with a `BatchResult`
/// holding one outcome per product, in request order. Product failures are
/// reported inside the result, not as an error status.
async fn process_products(
    State(state): State<AppState>,
    Json(products): Json<Vec<ProductImageSet>>,
) -> Result<Json<BatchResult>, (StatusCode, String)> {
    let start_time = std::time::Instant::now();

    if products.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No products provided".to_string()));
    }
    if let Some(p) = products.iter().find(|p| p.product_id.trim().is_empty()) {
        warn!("Rejecting batch with empty product id ({} urls)", p.primary_urls.len());
        return Err((StatusCode::BAD_REQUEST, "Every product needs a product_id".to_string()));
    }

    info!("Received {} products", products.len());

    let result = state.orchestrator.process_batch(products).await;

    info!(
        "Request completed in {:.2}s: {} successful, {} failed",
        start_time.elapsed().as_secs_f64(),
        result.successful,
        result.failed
    );

    Ok(Json(result))
}
