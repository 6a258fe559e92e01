pub mod routes;

use crate::results::RESULTS_ROUTE;
use crate::state::AnprServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Build the API router
pub fn router(state: AnprServiceState) -> Router {
    let results = ServeDir::new(state.results().root());

    Router::new()
        .route("/", get(routes::root))
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Pipelines
        .route("/api/v1/process-image", post(routes::process_image))
        .route("/api/v1/process-video", post(routes::process_video))
        // Dashboard
        .route("/api/v1/stats", get(routes::stats))
        .route("/api/v1/recent-detections", get(routes::recent_detections))
        .route("/api/v1/ocr-mode", get(routes::get_ocr_mode).post(routes::set_ocr_mode))
        .nest_service(RESULTS_ROUTE, results)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
