//! Drives one video from upload to report.

use super::association::{process_frame, VehicleRegistry};
use super::recognition::RecognitionStage;
use crate::backend::{PlateDetector, PlateRecognizer, VehicleTracker};
use crate::error::PipelineError;
use crate::results::ResultStore;
use crate::store::DetectionStore;
use crate::video::{VideoOpener, VideoSource};
use common::reports::VideoReport;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Input file owned by a pipeline run, removed when dropped
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed transient input"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove transient input"),
        }
    }
}

/// Open video source, released when dropped
struct SourceGuard(Box<dyn VideoSource>);

impl Deref for SourceGuard {
    type Target = dyn VideoSource;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for SourceGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Records one image or video run in the pipeline metrics. Counts as an
/// error unless [`ActiveRun::succeed`] is called.
pub(crate) struct ActiveRun {
    kind: &'static str,
    started: Instant,
    succeeded: bool,
}

impl ActiveRun {
    pub(crate) fn start(kind: &'static str) -> Self {
        telemetry::metrics::ANPR_ACTIVE_PIPELINES.inc();
        Self {
            kind,
            started: Instant::now(),
            succeeded: false,
        }
    }

    pub(crate) fn succeed(mut self) {
        self.succeeded = true;
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        telemetry::metrics::ANPR_ACTIVE_PIPELINES.dec();
        let status = if self.succeeded { "success" } else { "error" };
        telemetry::metrics::ANPR_PIPELINE_RUNS
            .with_label_values(&[self.kind, status])
            .inc();
        telemetry::metrics::ANPR_PIPELINE_DURATION
            .with_label_values(&[self.kind])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

#[derive(Clone)]
pub struct VideoPipeline {
    opener: Arc<dyn VideoOpener>,
    plate_detector: Arc<dyn PlateDetector>,
    store: Arc<dyn DetectionStore>,
    results: ResultStore,
}

impl VideoPipeline {
    pub fn new(
        opener: Arc<dyn VideoOpener>,
        plate_detector: Arc<dyn PlateDetector>,
        store: Arc<dyn DetectionStore>,
        results: ResultStore,
    ) -> Self {
        Self {
            opener,
            plate_detector,
            store,
            results,
        }
    }

    /// Process `input` end to end. The input file is removed on every exit path.
    #[instrument(skip_all, fields(input = %input.path().display(), recognizer = recognizer.name()))]
    pub async fn run(
        &self,
        input: TransientFile,
        tracker: &mut dyn VehicleTracker,
        recognizer: &dyn PlateRecognizer,
    ) -> Result<VideoReport, PipelineError> {
        let active = ActiveRun::start("video");
        let started = Instant::now();

        let source = self
            .opener
            .open(input.path())
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("{:#}", e)))?;
        let mut source = SourceGuard(source);

        let run = self.results.create_run()?;

        let mut registry = VehicleRegistry::new();
        let mut frame_number: u64 = 0;
        loop {
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(frame_number, error = %e, "frame read failed, ending video early");
                    break;
                }
            };

            process_frame(
                tracker,
                self.plate_detector.as_ref(),
                &mut registry,
                &frame,
                frame_number,
            )
            .await;
            frame_number += 1;
        }
        drop(source);

        info!(
            frames = frame_number,
            vehicles = registry.len(),
            result_id = run.id(),
            "frame loop complete"
        );

        let stage = RecognitionStage {
            recognizer,
            store: self.store.as_ref(),
            run: &run,
        };
        let tracked_vehicles = stage.run(&registry, started).await;

        info!(
            reported = tracked_vehicles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "video processed"
        );

        active.succeed();
        Ok(VideoReport {
            tracked_vehicles,
            result_id: run.id().to_string(),
        })
    }
}
