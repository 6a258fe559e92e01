//! Per-frame association of detected plates with tracked vehicles.

use super::ledger::{BestShotLedger, Shot};
use crate::backend::{Frame, PlateDetection, PlateDetector, TrackedBox, VehicleTracker};
use common::geometry::{iou, BoundingBox};
use common::reports::{VehicleClass, TRACKED_VEHICLE_CLASSES};
use image::RgbImage;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Minimum plate/vehicle overlap for a plate to count as seen on a vehicle.
///
/// Plate boxes are tiny compared to vehicle boxes, so the IoU of a plate
/// that sits fully inside its vehicle is usually only a few percent.
pub const ASSOCIATION_THRESHOLD: f32 = 0.01;

#[derive(Debug, Clone)]
pub struct TrackedVehicle {
    pub vehicle_id: u32,
    pub vehicle_type: VehicleClass,
    pub shots: BestShotLedger,
}

/// Arena of vehicles seen during one run, in first-creation order
#[derive(Debug, Default)]
pub struct VehicleRegistry {
    vehicles: Vec<TrackedVehicle>,
    index: HashMap<u32, usize>,
    types: HashMap<u32, VehicleClass>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest class reported for `vehicle_id`.
    pub fn observe(&mut self, vehicle_id: u32, class: VehicleClass) {
        self.types.insert(vehicle_id, class);
        if let Some(&slot) = self.index.get(&vehicle_id) {
            self.vehicles[slot].vehicle_type = class;
        }
    }

    pub fn vehicle_type(&self, vehicle_id: u32) -> Option<VehicleClass> {
        self.types.get(&vehicle_id).copied()
    }

    /// Admit `shot` into the vehicle's ledger, creating the vehicle on first use.
    pub fn admit(&mut self, vehicle_id: u32, shot: Shot) {
        let slot = match self.index.get(&vehicle_id) {
            Some(&slot) => slot,
            None => {
                let vehicle_type = self
                    .types
                    .get(&vehicle_id)
                    .copied()
                    .unwrap_or(VehicleClass::Unknown);
                self.vehicles.push(TrackedVehicle {
                    vehicle_id,
                    vehicle_type,
                    shots: BestShotLedger::new(),
                });
                self.index.insert(vehicle_id, self.vehicles.len() - 1);
                self.vehicles.len() - 1
            }
        };
        self.vehicles[slot].shots.admit(shot);
    }

    pub fn get(&self, vehicle_id: u32) -> Option<&TrackedVehicle> {
        self.index.get(&vehicle_id).map(|&slot| &self.vehicles[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedVehicle> {
        self.vehicles.iter()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

/// Crop `bbox` out of `frame`, clamped to the frame bounds.
///
/// A box entirely outside the frame yields an empty image.
pub fn crop_plate(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let clamped = bbox.clamp_to(frame.width(), frame.height());
    if clamped.is_empty() {
        return RgbImage::new(0, 0);
    }
    image::imageops::crop_imm(
        frame,
        clamped.x1 as u32,
        clamped.y1 as u32,
        clamped.width() as u32,
        clamped.height() as u32,
    )
    .to_image()
}

/// What one frame contributed to the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub vehicles: usize,
    pub plates: usize,
    pub admitted: usize,
}

/// Admit every (vehicle, plate) pair of one frame whose overlap clears
/// [`ASSOCIATION_THRESHOLD`]. Boxes without a track id are ignored.
pub fn associate(
    registry: &mut VehicleRegistry,
    frame: &Frame,
    frame_number: u64,
    vehicles: &[TrackedBox],
    plates: &[PlateDetection],
) -> usize {
    for vehicle in vehicles {
        if let Some(id) = vehicle.track_id {
            registry.observe(id, vehicle.class);
        }
    }

    if vehicles.is_empty() || plates.is_empty() {
        return 0;
    }

    let mut admitted = 0;
    for vehicle in vehicles {
        let Some(vehicle_id) = vehicle.track_id else {
            continue;
        };
        for plate in plates {
            if iou(&vehicle.bbox, &plate.bbox) > ASSOCIATION_THRESHOLD {
                registry.admit(
                    vehicle_id,
                    Shot {
                        image: crop_plate(frame, &plate.bbox),
                        confidence: plate.confidence,
                        frame_number,
                        plate_box: plate.bbox,
                    },
                );
                admitted += 1;
            }
        }
    }
    admitted
}

/// Run tracking, then plate detection, then association for one frame.
///
/// A failing tracker or detector only costs this frame its detections.
pub async fn process_frame(
    tracker: &mut dyn VehicleTracker,
    plate_detector: &dyn PlateDetector,
    registry: &mut VehicleRegistry,
    frame: &Frame,
    frame_number: u64,
) -> FrameSummary {
    let vehicles = match tracker.track(frame, &TRACKED_VEHICLE_CLASSES).await {
        Ok(boxes) => boxes,
        Err(e) => {
            warn!(frame_number, error = %e, "vehicle tracking failed");
            Vec::new()
        }
    };

    let plates = match plate_detector.detect(frame).await {
        Ok(plates) => plates,
        Err(e) => {
            warn!(frame_number, error = %e, "plate detection failed");
            Vec::new()
        }
    };

    let admitted = associate(registry, frame, frame_number, &vehicles, &plates);

    telemetry::metrics::ANPR_FRAMES_PROCESSED.inc();
    telemetry::metrics::ANPR_SHOTS_ADMITTED.inc_by(admitted as u64);
    if admitted > 0 {
        debug!(frame_number, admitted, "plates associated");
    }

    FrameSummary {
        vehicles: vehicles.len(),
        plates: plates.len(),
        admitted,
    }
}
