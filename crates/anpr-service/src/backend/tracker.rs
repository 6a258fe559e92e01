/// Greedy IoU multi-object tracker
///
/// Detections are matched to live tracks in descending IoU order. Unmatched
/// tracks coast for `max_coast_frames` before they are dropped, and a track
/// only exposes its id once it has been seen `min_hits_to_confirm` times in
/// a row. Tracks born on the first frame of a run are confirmed immediately.
use super::{Frame, TrackedBox, VehicleDetection, VehicleDetector, VehicleTracker};
use anyhow::Result;
use async_trait::async_trait;
use common::geometry::BoundingBox;
use common::reports::VehicleClass;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum IoU to match a detection to an existing track
    pub min_iou: f32,
    /// Frames a track survives without a detection before deletion
    pub max_coast_frames: u32,
    /// Consecutive hits required before the track id is reported
    pub min_hits_to_confirm: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_coast_frames: 30,
            min_hits_to_confirm: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct Track {
    id: u32,
    bbox: BoundingBox,
    class: VehicleClass,
    consecutive_hits: u32,
    frames_since_hit: u32,
    confirmed: bool,
}

pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
    frame_count: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame_count: 0,
        }
    }

    /// Advance one frame. Returns one box per detection, in detection order.
    pub fn update(&mut self, detections: &[VehicleDetection]) -> Vec<TrackedBox> {
        self.frame_count += 1;

        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let score = track.bbox.iou(&det.bbox);
                if score >= self.config.min_iou {
                    pairs.push((ti, di, score));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut assignment: Vec<Option<usize>> = vec![None; detections.len()];
        for (ti, di, _) in pairs {
            if track_matched[ti] || assignment[di].is_some() {
                continue;
            }
            track_matched[ti] = true;
            assignment[di] = Some(ti);

            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.class = detections[di].class;
            track.consecutive_hits += 1;
            track.frames_since_hit = 0;
            if track.consecutive_hits >= self.config.min_hits_to_confirm {
                track.confirmed = true;
            }
        }

        for (ti, matched) in track_matched.iter().enumerate() {
            if !matched {
                let track = &mut self.tracks[ti];
                track.frames_since_hit += 1;
                track.consecutive_hits = 0;
            }
        }

        for (di, det) in detections.iter().enumerate() {
            if assignment[di].is_some() {
                continue;
            }
            let track = Track {
                id: self.next_id,
                bbox: det.bbox,
                class: det.class,
                consecutive_hits: 1,
                frames_since_hit: 0,
                confirmed: self.frame_count == 1 || self.config.min_hits_to_confirm <= 1,
            };
            debug!(track_id = track.id, class = %track.class, "new track");
            self.next_id += 1;
            assignment[di] = Some(self.tracks.len());
            self.tracks.push(track);
        }

        let boxes = assignment
            .iter()
            .zip(detections)
            .filter_map(|(slot, det)| {
                let track = self.tracks.get((*slot)?)?;
                Some(TrackedBox {
                    bbox: det.bbox,
                    track_id: track.confirmed.then_some(track.id),
                    class: det.class,
                })
            })
            .collect();

        let max_coast = self.config.max_coast_frames;
        self.tracks.retain(|t| t.frames_since_hit <= max_coast);

        boxes
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }
}

/// Detector plus tracker, driven frame by frame
pub struct DetectionTracker {
    detector: Arc<dyn VehicleDetector>,
    tracker: IouTracker,
}

impl DetectionTracker {
    pub fn new(detector: Arc<dyn VehicleDetector>, config: TrackerConfig) -> Self {
        Self {
            detector,
            tracker: IouTracker::new(config),
        }
    }
}

#[async_trait]
impl VehicleTracker for DetectionTracker {
    async fn track(&mut self, frame: &Frame, classes: &[VehicleClass]) -> Result<Vec<TrackedBox>> {
        let detections = self.detector.detect_vehicles(frame, classes).await?;
        Ok(self.tracker.update(&detections))
    }
}
