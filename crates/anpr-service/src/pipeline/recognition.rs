//! Deferred recognition over the shots retained by every vehicle ledger.

use super::association::VehicleRegistry;
use crate::backend::{CharacterBox, PlateRecognizer};
use crate::results::ResultRun;
use crate::store::DetectionStore;
use chrono::Utc;
use common::detections::{DetectionKind, DetectionRecord, OCR_FAILED};
use common::reports::{BestFrame, LicencePlateDetails, TrackedVehicleReport};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of reading one crop
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    /// Recognized text, or [`OCR_FAILED`]
    pub text: String,
    pub error: Option<String>,
    /// Characters the recognizer located, empty on failure
    pub characters: Vec<CharacterBox>,
}

/// Read one crop. Empty text and backend errors both become [`OCR_FAILED`].
pub async fn read_plate(recognizer: &dyn PlateRecognizer, crop: &RgbImage) -> PlateReading {
    let reading = match recognizer.recognize(crop).await {
        Ok(recognition) if !recognition.text.is_empty() => PlateReading {
            text: recognition.text,
            error: None,
            characters: recognition.characters,
        },
        Ok(recognition) => PlateReading {
            text: OCR_FAILED.to_string(),
            error: None,
            characters: recognition.characters,
        },
        Err(e) => {
            warn!(backend = recognizer.name(), error = %e, "plate recognition failed");
            PlateReading {
                text: OCR_FAILED.to_string(),
                error: Some(e.to_string()),
                characters: Vec::new(),
            }
        }
    };

    let status = if reading.text == OCR_FAILED { "failed" } else { "success" };
    telemetry::metrics::ANPR_RECOGNITIONS
        .with_label_values(&[recognizer.name(), status])
        .inc();

    reading
}

/// Persist `record`, logging instead of failing.
pub async fn persist(store: &dyn DetectionStore, record: DetectionRecord) {
    let plate = record.plate.clone();
    if let Err(e) = store.insert(record).await {
        warn!(plate = %plate, error = %e, "failed to persist detection");
    }
}

pub struct RecognitionStage<'a> {
    pub recognizer: &'a dyn PlateRecognizer,
    pub store: &'a dyn DetectionStore,
    pub run: &'a ResultRun,
}

impl RecognitionStage<'_> {
    /// Recognize every retained shot, vehicle by vehicle in creation order.
    ///
    /// Only the best shot of a vehicle is persisted. Vehicles left without
    /// any recognized shot are dropped from the report.
    pub async fn run(&self, registry: &VehicleRegistry, started: Instant) -> Vec<TrackedVehicleReport> {
        let mut reports = Vec::new();

        for vehicle in registry.iter() {
            let mut best_frames = Vec::with_capacity(vehicle.shots.len());
            let mut best_crop: Option<&RgbImage> = None;

            for (rank, shot) in vehicle.shots.iter().enumerate() {
                if shot.is_degenerate() {
                    debug!(vehicle_id = vehicle.vehicle_id, rank, "skipping zero-area crop");
                    continue;
                }

                let reading = read_plate(self.recognizer, &shot.image).await;

                if rank == 0 {
                    let record = DetectionRecord::new(
                        DetectionKind::Video,
                        reading.text.clone(),
                        shot.confidence,
                        Utc::now(),
                    )
                    .with_result_id(self.run.id())
                    .with_processing_time_ms(started.elapsed().as_millis() as u64);
                    persist(self.store, record).await;
                }

                best_crop.get_or_insert(&shot.image);
                best_frames.push(BestFrame {
                    frame_info: shot.frame_number,
                    licence_plate_details: LicencePlateDetails {
                        confidence: shot.confidence,
                        bounding_box: shot.plate_box,
                    },
                    ocr_result: reading.text,
                });
            }

            if best_frames.is_empty() {
                continue;
            }

            if let Some(crop) = best_crop {
                let name = format!("vehicle_{}_best.jpg", vehicle.vehicle_id);
                if let Err(e) = self.run.save_jpeg(&name, crop) {
                    warn!(vehicle_id = vehicle.vehicle_id, error = %e, "failed to save best crop");
                }
            }

            info!(
                vehicle_id = vehicle.vehicle_id,
                vehicle_type = %vehicle.vehicle_type,
                shots = best_frames.len(),
                best = %best_frames[0].ocr_result,
                "vehicle recognized"
            );

            reports.push(TrackedVehicleReport {
                vehicle_id: vehicle.vehicle_id,
                vehicle_type: vehicle.vehicle_type,
                best_frames,
            });
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Recognition;
    use crate::pipeline::ledger::Shot;
    use crate::results::ResultStore;
    use crate::store::MemoryDetectionStore;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use common::detections::DetectionStatus;
    use common::geometry::BoundingBox;
    use common::reports::VehicleClass;

    /// Reads the crop width back as text; width 13 fails, width 7 is unreadable
    struct WidthRecognizer;

    #[async_trait]
    impl PlateRecognizer for WidthRecognizer {
        fn name(&self) -> &'static str {
            "width"
        }

        async fn recognize(&self, plate: &RgbImage) -> Result<Recognition> {
            match plate.width() {
                13 => bail!("backend down"),
                7 => Ok(Recognition::default()),
                w => Ok(Recognition {
                    text: format!("W{}", w),
                    characters: vec![],
                }),
            }
        }
    }

    fn shot(width: u32, confidence: f32, frame_number: u64) -> Shot {
        Shot {
            image: RgbImage::new(width, if width == 0 { 0 } else { 4 }),
            confidence,
            frame_number,
            plate_box: BoundingBox::new(0, 0, width as i32, 4),
        }
    }

    #[tokio::test]
    async fn test_read_plate_failure_modes() {
        let ok = read_plate(&WidthRecognizer, &RgbImage::new(20, 4)).await;
        assert_eq!(ok.text, "W20");

        let empty = read_plate(&WidthRecognizer, &RgbImage::new(7, 4)).await;
        assert_eq!(empty.text, OCR_FAILED);
        assert!(empty.error.is_none());

        let failed = read_plate(&WidthRecognizer, &RgbImage::new(13, 4)).await;
        assert_eq!(failed.text, OCR_FAILED);
        assert_eq!(failed.error.as_deref(), Some("backend down"));
    }

    #[tokio::test]
    async fn test_only_best_shot_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let run = ResultStore::new(dir.path()).create_run().unwrap();
        let store = MemoryDetectionStore::new();

        let mut registry = VehicleRegistry::new();
        registry.observe(5, VehicleClass::Truck);
        registry.admit(5, shot(20, 0.6, 0));
        registry.admit(5, shot(13, 0.9, 1));
        registry.admit(5, shot(30, 0.7, 2));

        let stage = RecognitionStage {
            recognizer: &WidthRecognizer,
            store: &store,
            run: &run,
        };
        let reports = stage.run(&registry, Instant::now()).await;

        assert_eq!(reports.len(), 1);
        let texts: Vec<&str> = reports[0].best_frames.iter().map(|f| f.ocr_result.as_str()).collect();
        assert_eq!(texts, vec![OCR_FAILED, "W30", "W20"]);
        assert_eq!(reports[0].vehicle_type, VehicleClass::Truck);

        let records = store.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].plate, OCR_FAILED);
        assert_eq!(records[0].status, DetectionStatus::Failed);
        assert_eq!(records[0].confidence, 0.9);
        assert_eq!(records[0].result_id.as_deref(), Some(run.id()));

        assert!(run.dir().join("vehicle_5_best.jpg").exists());
    }

    #[tokio::test]
    async fn test_degenerate_shots_are_skipped_and_empty_vehicles_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let run = ResultStore::new(dir.path()).create_run().unwrap();
        let store = MemoryDetectionStore::new();

        let mut registry = VehicleRegistry::new();
        registry.admit(1, shot(0, 0.95, 0));
        registry.admit(2, shot(0, 0.9, 0));
        registry.admit(2, shot(20, 0.5, 1));

        let stage = RecognitionStage {
            recognizer: &WidthRecognizer,
            store: &store,
            run: &run,
        };
        let reports = stage.run(&registry, Instant::now()).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].vehicle_id, 2);
        assert_eq!(reports[0].best_frames.len(), 1);
        assert_eq!(reports[0].best_frames[0].frame_info, 1);
        // The best shot was degenerate, so nothing is persisted
        assert!(store.recent(10).await.unwrap().is_empty());
    }
}
