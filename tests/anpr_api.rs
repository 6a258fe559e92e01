/// Integration tests for the ANPR HTTP API
use anpr_service::backend::{
    Frame, PlateDetection, PlateDetector, PlateRecognizer, Recognition, TrackedBox, VehicleTracker,
};
use anpr_service::ocr_mode::OcrModeStore;
use anpr_service::results::ResultStore;
use anpr_service::state::TrackerFactory;
use anpr_service::store::MemoryDetectionStore;
use anpr_service::video::{VideoOpener, VideoSource};
use anpr_service::{api, AnprServiceState, Backends};
use anyhow::{bail, Result};
use async_trait::async_trait;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use common::detections::{DetectionStats, RecentDetection, OCR_FAILED};
use common::geometry::BoundingBox;
use common::reports::{ImageReport, OcrMode, OcrModeBody, VehicleClass, VideoReport};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;

const PLATE_BOX: BoundingBox = BoundingBox {
    x1: 100,
    y1: 150,
    x2: 180,
    y2: 175,
};

struct FixedPlates;

#[async_trait]
impl PlateDetector for FixedPlates {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<PlateDetection>> {
        Ok(vec![PlateDetection {
            bbox: PLATE_BOX,
            confidence: 0.87,
        }])
    }
}

struct FixedRecognizer(&'static str);

#[async_trait]
impl PlateRecognizer for FixedRecognizer {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn recognize(&self, _plate: &RgbImage) -> Result<Recognition> {
        Ok(Recognition {
            text: self.0.to_string(),
            characters: vec![],
        })
    }
}

struct FixedTracker;

#[async_trait]
impl VehicleTracker for FixedTracker {
    async fn track(&mut self, _frame: &Frame, _classes: &[VehicleClass]) -> Result<Vec<TrackedBox>> {
        Ok(vec![TrackedBox {
            bbox: BoundingBox::new(60, 60, 260, 230),
            track_id: Some(11),
            class: VehicleClass::Truck,
        }])
    }
}

struct FramesSource(Vec<Frame>);

#[async_trait]
impl VideoSource for FramesSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.0.pop())
    }

    fn release(&mut self) {}
}

/// Opens any file as a few gray frames; files containing `corrupt` fail
struct FakeOpener;

#[async_trait]
impl VideoOpener for FakeOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        let content = std::fs::read(path)?;
        if content.windows(7).any(|w| w == b"corrupt") {
            bail!("moov atom not found");
        }
        Ok(Box::new(FramesSource(vec![test_image(); 3])))
    }
}

fn test_image() -> RgbImage {
    RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]))
}

fn jpeg_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    test_image()
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

struct TestService {
    server: TestServer,
    dir: tempfile::TempDir,
}

fn loaded_backends() -> Backends {
    let tracker: TrackerFactory = Arc::new(|| Box::new(FixedTracker) as Box<dyn VehicleTracker>);
    Backends {
        tracker: Some(tracker),
        plate_detector: Some(Arc::new(FixedPlates)),
        local_recognizer: Some(Arc::new(FixedRecognizer("KA01AB1234"))),
        remote_recognizer: None,
        opener: Arc::new(FakeOpener),
    }
}

fn setup(backends: Backends) -> TestService {
    let dir = tempfile::tempdir().unwrap();
    let state = AnprServiceState::new(
        backends,
        Arc::new(MemoryDetectionStore::new()),
        OcrModeStore::new(dir.path().join("ocr_mode.txt")),
        ResultStore::new(dir.path().join("results")),
        dir.path().join("tmp"),
    );
    let server = TestServer::new(api::router(state)).unwrap();
    TestService { server, dir }
}

fn upload(bytes: Vec<u8>, name: &str) -> MultipartForm {
    MultipartForm::new().add_part("file", Part::bytes(bytes).file_name(name.to_string()))
}

#[tokio::test]
async fn test_root_status() {
    let svc = setup(Backends::default());
    let response = svc.server.get("/").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ANPR Backend is running.");
}

#[tokio::test]
async fn test_health_and_readiness() {
    let svc = setup(Backends::default());
    assert_eq!(svc.server.get("/healthz").await.status_code(), 200);
    assert_eq!(svc.server.get("/readyz").await.status_code(), 503);

    let svc = setup(loaded_backends());
    assert_eq!(svc.server.get("/readyz").await.status_code(), 200);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let svc = setup(loaded_backends());
    svc.server
        .post("/api/v1/process-image")
        .multipart(upload(jpeg_bytes(), "car.jpg"))
        .await;

    let response = svc.server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);
    assert!(response.text().contains("anpr_pipeline_runs_total"));
}

#[tokio::test]
async fn test_pipelines_unavailable_without_models() {
    let svc = setup(Backends::default());

    let response = svc
        .server
        .post("/api/v1/process-image")
        .multipart(upload(jpeg_bytes(), "car.jpg"))
        .await;
    assert_eq!(response.status_code(), 503);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "A required model is not loaded.");

    let response = svc
        .server
        .post("/api/v1/process-video")
        .multipart(upload(b"video".to_vec(), "clip.mp4"))
        .await;
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn test_process_image_reads_plate_and_updates_dashboard() {
    let svc = setup(loaded_backends());

    let response = svc
        .server
        .post("/api/v1/process-image")
        .multipart(upload(jpeg_bytes(), "car.jpg"))
        .await;
    assert_eq!(response.status_code(), 200);

    let report: ImageReport = response.json();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].plate_text, "KA01AB1234");
    assert_eq!(report.results[0].confidence, 0.87);
    assert_eq!(report.results[0].bounding_box.x1, 100.0);
    assert_eq!(
        report.annotated_image_url,
        format!("/results/{}/plate_detection.jpg", report.result_id)
    );

    let run_dir = svc.dir.path().join("results").join(&report.result_id);
    assert!(run_dir.join("original.jpg").exists());
    assert!(run_dir.join("cropped_plate_0.jpg").exists());
    assert!(run_dir.join("plate_detection.jpg").exists());

    let annotated = svc.server.get(&report.annotated_image_url).await;
    assert_eq!(annotated.status_code(), 200);

    let stats: DetectionStats = svc.server.get("/api/v1/stats").await.json();
    assert_eq!(stats.total_inferences, 1);
    assert_eq!(stats.avg_confidence, 0.87);
    assert_eq!(stats.ocr_failure_rate, 0.0);

    let recent: Vec<RecentDetection> = svc.server.get("/api/v1/recent-detections").await.json();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].plate, "KA01AB1234");
    assert_eq!(recent[0].timestamp.len(), "2024-01-01 00:00:00".len());
}

#[tokio::test]
async fn test_process_image_rejects_garbage() {
    let svc = setup(loaded_backends());
    let response = svc
        .server
        .post("/api/v1/process-image")
        .multipart(upload(b"not an image".to_vec(), "car.jpg"))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_process_image_counts_unreadable_plates_as_failures() {
    let mut backends = loaded_backends();
    backends.local_recognizer = Some(Arc::new(FixedRecognizer("")));
    let svc = setup(backends);

    let report: ImageReport = svc
        .server
        .post("/api/v1/process-image")
        .multipart(upload(jpeg_bytes(), "car.jpg"))
        .await
        .json();
    assert_eq!(report.results[0].plate_text, OCR_FAILED);

    let stats: DetectionStats = svc.server.get("/api/v1/stats").await.json();
    assert_eq!(stats.ocr_failure_rate, 100.0);
}

#[tokio::test]
async fn test_process_video_reports_tracked_vehicle() {
    let svc = setup(loaded_backends());

    let response = svc
        .server
        .post("/api/v1/process-video")
        .multipart(upload(b"fake mp4 bytes".to_vec(), "clip.mp4"))
        .await;
    assert_eq!(response.status_code(), 200);

    let report: VideoReport = response.json();
    assert_eq!(report.tracked_vehicles.len(), 1);
    let vehicle = &report.tracked_vehicles[0];
    assert_eq!(vehicle.vehicle_id, 11);
    assert_eq!(vehicle.vehicle_type, VehicleClass::Truck);
    assert_eq!(vehicle.best_frames.len(), 3);
    assert!(vehicle.best_frames.iter().all(|f| f.ocr_result == "KA01AB1234"));

    let run_dir = svc.dir.path().join("results").join(&report.result_id);
    assert!(run_dir.join("vehicle_11_best.jpg").exists());

    // Staged upload is gone
    let staged: Vec<_> = std::fs::read_dir(svc.dir.path().join("tmp")).unwrap().collect();
    assert!(staged.is_empty());

    let stats: DetectionStats = svc.server.get("/api/v1/stats").await.json();
    assert_eq!(stats.total_inferences, 1);
}

#[tokio::test]
async fn test_process_video_unreadable_source() {
    let svc = setup(loaded_backends());

    let response = svc
        .server
        .post("/api/v1/process-video")
        .multipart(upload(b"corrupt".to_vec(), "clip.mp4"))
        .await;
    assert_eq!(response.status_code(), 422);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("moov atom not found"));

    let staged: Vec<_> = std::fs::read_dir(svc.dir.path().join("tmp")).unwrap().collect();
    assert!(staged.is_empty());
}

#[tokio::test]
async fn test_upload_requires_file_field() {
    let svc = setup(loaded_backends());
    let form = MultipartForm::new().add_text("other", "value");
    let response = svc.server.post("/api/v1/process-image").multipart(form).await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_process_video_long_file_name_is_bad_request() {
    let svc = setup(loaded_backends());

    let name = format!("{}.mp4", "x".repeat(2000));
    let response = svc
        .server
        .post("/api/v1/process-video")
        .multipart(upload(b"fake mp4 bytes".to_vec(), &name))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("file name"));

    let stats: DetectionStats = svc.server.get("/api/v1/stats").await.json();
    assert_eq!(stats.total_inferences, 0);
}

#[tokio::test]
async fn test_ocr_mode_round_trip() {
    let svc = setup(loaded_backends());

    let body: OcrModeBody = svc.server.get("/api/v1/ocr-mode").await.json();
    assert_eq!(body.ocr_mode, OcrMode::Local);

    let response = svc
        .server
        .post("/api/v1/ocr-mode")
        .json(&serde_json::json!({ "ocr_mode": "roboflow" }))
        .await;
    assert_eq!(response.status_code(), 200);

    let body: OcrModeBody = svc.server.get("/api/v1/ocr-mode").await.json();
    assert_eq!(body.ocr_mode, OcrMode::Roboflow);

    // Roboflow is not configured in this service
    let response = svc
        .server
        .post("/api/v1/process-image")
        .multipart(upload(jpeg_bytes(), "car.jpg"))
        .await;
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn test_invalid_ocr_mode_rejected() {
    let svc = setup(loaded_backends());

    let response = svc
        .server
        .post("/api/v1/ocr-mode")
        .json(&serde_json::json!({ "ocr_mode": "tesseract" }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Invalid OCR mode. Must be 'local' or 'roboflow'.");

    let body: OcrModeBody = svc.server.get("/api/v1/ocr-mode").await.json();
    assert_eq!(body.ocr_mode, OcrMode::Local);
}

#[tokio::test]
async fn test_ocr_mode_bodies_without_a_mode_are_bad_requests() {
    let svc = setup(loaded_backends());

    for body in [
        serde_json::json!({}),
        serde_json::json!({ "ocr_mode": 5 }),
        serde_json::json!({ "ocr_mode": null }),
    ] {
        let response = svc.server.post("/api/v1/ocr-mode").json(&body).await;
        assert_eq!(response.status_code(), 400, "body {}", body);
        let error: serde_json::Value = response.json();
        assert_eq!(error["error"], "Invalid OCR mode. Must be 'local' or 'roboflow'.");
    }

    let response = svc
        .server
        .post("/api/v1/ocr-mode")
        .text("{not json")
        .content_type("application/json")
        .await;
    assert_eq!(response.status_code(), 400);

    let body: OcrModeBody = svc.server.get("/api/v1/ocr-mode").await.json();
    assert_eq!(body.ocr_mode, OcrMode::Local);
}
