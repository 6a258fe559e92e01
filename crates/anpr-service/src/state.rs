use crate::backend::tracker::{DetectionTracker, TrackerConfig};
use crate::backend::{PlateDetector, PlateRecognizer, VehicleDetector, VehicleTracker};
use crate::error::ApiError;
use crate::ocr_mode::OcrModeStore;
use crate::pipeline::{ImagePipeline, TransientFile, VideoPipeline};
use crate::results::ResultStore;
use crate::store::DetectionStore;
use crate::video::{FfmpegVideoOpener, VideoOpener};
use anyhow::Context;
use common::reports::OcrMode;
use common::validation::{sanitize_upload_name, validate_length, validate_path_components};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Longest client file name accepted before sanitizing
const MAX_RAW_UPLOAD_NAME: usize = 1024;

/// Builds a fresh tracker for every video run
pub type TrackerFactory = Arc<dyn Fn() -> Box<dyn VehicleTracker> + Send + Sync>;

/// Everything the pipelines call out to. Missing models are `None`.
#[derive(Clone)]
pub struct Backends {
    pub tracker: Option<TrackerFactory>,
    pub plate_detector: Option<Arc<dyn PlateDetector>>,
    pub local_recognizer: Option<Arc<dyn PlateRecognizer>>,
    pub remote_recognizer: Option<Arc<dyn PlateRecognizer>>,
    pub opener: Arc<dyn VideoOpener>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            tracker: None,
            plate_detector: None,
            local_recognizer: None,
            remote_recognizer: None,
            opener: Arc::new(FfmpegVideoOpener),
        }
    }
}

impl Backends {
    /// Track with an IoU tracker over `detector`'s per-frame detections.
    pub fn tracker_from_detector(detector: Arc<dyn VehicleDetector>, config: TrackerConfig) -> TrackerFactory {
        Arc::new(move || Box::new(DetectionTracker::new(detector.clone(), config.clone())) as Box<dyn VehicleTracker>)
    }
}

#[derive(Clone)]
pub struct AnprServiceState {
    inner: Arc<AnprServiceStateInner>,
}

struct AnprServiceStateInner {
    backends: Backends,
    store: Arc<dyn DetectionStore>,
    ocr_mode: OcrModeStore,
    results: ResultStore,
    temp_dir: PathBuf,
    video: Option<VideoPipeline>,
    image: Option<ImagePipeline>,
}

impl AnprServiceState {
    pub fn new(
        backends: Backends,
        store: Arc<dyn DetectionStore>,
        ocr_mode: OcrModeStore,
        results: ResultStore,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        let video = backends.plate_detector.as_ref().map(|plates| {
            VideoPipeline::new(backends.opener.clone(), plates.clone(), store.clone(), results.clone())
        });
        let image = backends
            .plate_detector
            .as_ref()
            .map(|plates| ImagePipeline::new(plates.clone(), store.clone(), results.clone()));

        Self {
            inner: Arc::new(AnprServiceStateInner {
                backends,
                store,
                ocr_mode,
                results,
                temp_dir: temp_dir.into(),
                video,
                image,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DetectionStore> {
        &self.inner.store
    }

    pub fn ocr_mode(&self) -> &OcrModeStore {
        &self.inner.ocr_mode
    }

    pub fn results(&self) -> &ResultStore {
        &self.inner.results
    }

    /// Whether every model needed by both pipelines in local mode is loaded
    pub fn models_loaded(&self) -> bool {
        let b = &self.inner.backends;
        b.tracker.is_some() && b.plate_detector.is_some() && b.local_recognizer.is_some()
    }

    /// The recognizer for `mode`, chosen once per pipeline run.
    pub fn recognizer_for(&self, mode: OcrMode) -> Result<Arc<dyn PlateRecognizer>, ApiError> {
        let recognizer = match mode {
            OcrMode::Local => &self.inner.backends.local_recognizer,
            OcrMode::Roboflow => &self.inner.backends.remote_recognizer,
        };
        recognizer.clone().ok_or(ApiError::ModelsUnavailable)
    }

    pub fn image_pipeline(&self) -> Result<&ImagePipeline, ApiError> {
        self.inner.image.as_ref().ok_or(ApiError::ModelsUnavailable)
    }

    /// The video pipeline and a fresh tracker for one run.
    pub fn video_pipeline(&self) -> Result<(&VideoPipeline, Box<dyn VehicleTracker>), ApiError> {
        let pipeline = self.inner.video.as_ref().ok_or(ApiError::ModelsUnavailable)?;
        let factory = self.inner.backends.tracker.as_ref().ok_or(ApiError::ModelsUnavailable)?;
        Ok((pipeline, factory()))
    }

    /// Write an upload to the temp directory. The file is removed when the
    /// returned handle drops, including when the write itself fails.
    ///
    /// A file name the client cannot use is a bad request.
    pub async fn stage_upload(&self, file_name: &str, bytes: &[u8]) -> Result<TransientFile, ApiError> {
        validate_length(file_name, MAX_RAW_UPLOAD_NAME, "file name")
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let staged_name = format!("{}_{}", Uuid::new_v4(), sanitize_upload_name(file_name));
        let path = validate_path_components(Path::new(&staged_name), &self.inner.temp_dir, "file name")
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        tokio::fs::create_dir_all(&self.inner.temp_dir)
            .await
            .with_context(|| format!("failed to create {}", self.inner.temp_dir.display()))?;

        let staged = TransientFile::new(path);
        tokio::fs::write(staged.path(), bytes)
            .await
            .with_context(|| format!("failed to stage upload {}", staged.path().display()))?;
        Ok(staged)
    }
}
