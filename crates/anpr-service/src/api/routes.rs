use crate::error::ApiError;
use crate::state::AnprServiceState;
use crate::store::DEFAULT_RECENT_LIMIT;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::detections::{DetectionStats, RecentDetection};
use common::reports::{ImageReport, OcrMode, OcrModeBody, VideoReport};
use serde_json::json;

/// Pull the `file` field out of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("failed to read upload: {}", e)))?;
            return Ok((name, data));
        }
    }
    Err(ApiError::bad_request("missing 'file' field"))
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "status": "ANPR Backend is running." }))
}

/// Process one uploaded image
pub async fn process_image(
    State(state): State<AnprServiceState>,
    multipart: Multipart,
) -> Result<Json<ImageReport>, ApiError> {
    let pipeline = state.image_pipeline()?;
    let recognizer = state.recognizer_for(state.ocr_mode().get().await)?;

    let (name, bytes) = read_upload(multipart).await?;
    tracing::info!(file = %name, bytes = bytes.len(), "image upload received");

    let report = pipeline.run(&bytes, recognizer.as_ref()).await?;
    Ok(Json(report))
}

/// Process one uploaded video
pub async fn process_video(
    State(state): State<AnprServiceState>,
    multipart: Multipart,
) -> Result<Json<VideoReport>, ApiError> {
    let (pipeline, mut tracker) = state.video_pipeline()?;
    let recognizer = state.recognizer_for(state.ocr_mode().get().await)?;

    let (name, bytes) = read_upload(multipart).await?;
    tracing::info!(file = %name, bytes = bytes.len(), "video upload received");

    let staged = state.stage_upload(&name, &bytes).await?;
    drop(bytes);

    let report = pipeline.run(staged, tracker.as_mut(), recognizer.as_ref()).await?;
    Ok(Json(report))
}

pub async fn stats(State(state): State<AnprServiceState>) -> Result<Json<DetectionStats>, ApiError> {
    Ok(Json(state.store().stats().await?))
}

pub async fn recent_detections(
    State(state): State<AnprServiceState>,
) -> Result<Json<Vec<RecentDetection>>, ApiError> {
    let records = state.store().recent(DEFAULT_RECENT_LIMIT).await?;
    Ok(Json(records.iter().map(RecentDetection::from).collect()))
}

pub async fn get_ocr_mode(State(state): State<AnprServiceState>) -> Json<OcrModeBody> {
    Json(OcrModeBody {
        ocr_mode: state.ocr_mode().get().await,
    })
}

/// Set the OCR mode from `{"ocr_mode": "local" | "roboflow"}`.
///
/// Any body that does not name a known mode, malformed JSON included, is a 400.
pub async fn set_ocr_mode(
    State(state): State<AnprServiceState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mode: OcrMode = payload
        .ok()
        .and_then(|Json(body)| body.get("ocr_mode")?.as_str()?.parse().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid OCR mode. Must be 'local' or 'roboflow'."))?;
    state.ocr_mode().set(mode).await?;
    Ok(Json(json!({
        "message": format!("OCR mode set to {}", mode),
        "ocr_mode": mode,
    })))
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "anpr-service"
        })),
    )
}

/// Readiness: every model the local pipelines need is loaded
pub async fn readyz(State(state): State<AnprServiceState>) -> impl IntoResponse {
    if state.models_loaded() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "error": ApiError::ModelsUnavailable.to_string() })),
        )
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
