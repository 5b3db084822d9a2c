// Main entry point for the open-vocabulary detection service

use owl_detect::{
    core::{
        types::{DetectionRequest, DetectionResponse},
        Config,
    },
    orchestration::DetectionPipeline,
    utils::Metrics,
};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    pipeline: Arc<DetectionPipeline>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().expect("Failed to load configuration"));

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "owl_detect={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== OPEN-VOCABULARY DETECTION SERVICE ===");
    info!(
        "Config: threshold={:.2} input={}px pool={}",
        config.confidence_threshold(),
        config.target_size(),
        config.pool_size()
    );

    // Initialize metrics
    let metrics = Metrics::new();

    // Load model + tokenizer; a failure here is fatal
    info!("🔄 Loading OWLv2 model...");
    let pipeline = Arc::new(DetectionPipeline::new(config.clone(), metrics.clone()).await?);
    info!("✅ Model loaded successfully ({})", pipeline.device_type());

    let state = AppState { pipeline, metrics };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create router with monitoring endpoints
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/detect", post(detect))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /        - Root endpoint");
    info!("  GET  /health  - Health check");
    info!("  GET  /metrics - Prometheus metrics");
    info!("  GET  /stats   - Detailed statistics");
    info!("  POST /detect  - Open-vocabulary detection (JSON)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Open-Vocabulary Detection Service"
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
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

/// Detection endpoint
///
/// # Request Format:
/// - JSON body: {"image_url": "...", "prompts": "cat, dog"}
///
/// # Response:
/// Always HTTP 200. Failures anywhere in the pipeline are reported
/// in-band as {"status": "error", "message": "..."}.
async fn detect(
    State(state): State<AppState>,
    Json(request): Json<DetectionRequest>,
) -> Json<DetectionResponse> {
    let start_time = std::time::Instant::now();
    state.metrics.record_endpoint_request("/detect");

    info!("Received detection request for {}", request.image_url);

    match state.pipeline.process(&request).await {
        Ok(outcome) => {
            state.metrics.record_request(true);
            info!(
                "Request completed in {:.2}s: {} detections",
                start_time.elapsed().as_secs_f64(),
                outcome.detections.len()
            );
            Json(DetectionResponse::success(outcome))
        }
        Err(e) => {
            state.metrics.record_request(false);
            error!("Detection pipeline failed: {:?}", e);
            Json(DetectionResponse::error(e.to_string()))
        }
    }
}
