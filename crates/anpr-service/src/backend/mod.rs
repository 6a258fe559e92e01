//! Contracts for the external collaborators of the pipelines, plus the
//! concrete ONNX, tracker and HTTP implementations.
//!
//! The pipelines only ever see these traits, so any backend can be swapped
//! for a fake in tests.

pub mod local_ocr;
pub mod onnx;
pub mod plate_detector;
pub mod remote_ocr;
pub mod tracker;
pub mod vehicle_detector;

use anyhow::Result;
use async_trait::async_trait;
use common::geometry::BoundingBox;
use common::reports::VehicleClass;
use image::RgbImage;
use serde::Serialize;

/// A decoded RGB video frame or still image
pub type Frame = RgbImage;

/// Vehicle box reported by the tracker for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBox {
    pub bbox: BoundingBox,
    /// Stable across frames once the tracker has confirmed the track
    pub track_id: Option<u32>,
    pub class: VehicleClass,
}

/// Plate box reported by the plate detector
#[derive(Debug, Clone, PartialEq)]
pub struct PlateDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Vehicle box before tracking
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleDetection {
    pub bbox: BoundingBox,
    pub class: VehicleClass,
    pub confidence: f32,
}

/// One character found by a recognizer, in crop coordinates.
///
/// `x` and `y` are the centre of the box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterBox {
    pub label: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl CharacterBox {
    pub fn left(&self) -> f32 {
        self.x - self.width / 2.0
    }

    /// Integer corners, truncated toward zero.
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(
            self.left() as i32,
            (self.y - self.height / 2.0) as i32,
            (self.x + self.width / 2.0) as i32,
            (self.y + self.height / 2.0) as i32,
        )
    }
}

/// Text read from a plate crop; `text` may be empty
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Recognition {
    pub text: String,
    pub characters: Vec<CharacterBox>,
}

impl Recognition {
    /// Join characters ordered by centre `x` into the plate text.
    pub fn from_characters(mut characters: Vec<CharacterBox>) -> Self {
        characters.sort_by(|a, b| a.x.total_cmp(&b.x));
        Self::in_order(characters)
    }

    /// Join characters in the order given.
    pub fn in_order(characters: Vec<CharacterBox>) -> Self {
        let text = characters.iter().map(|c| c.label.as_str()).collect();
        Self { text, characters }
    }
}

/// Stateful multi-object tracker; one instance per video run
#[async_trait]
pub trait VehicleTracker: Send {
    async fn track(&mut self, frame: &Frame, classes: &[VehicleClass]) -> Result<Vec<TrackedBox>>;
}

#[async_trait]
pub trait VehicleDetector: Send + Sync {
    async fn detect_vehicles(
        &self,
        frame: &Frame,
        classes: &[VehicleClass],
    ) -> Result<Vec<VehicleDetection>>;
}

#[async_trait]
pub trait PlateDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<PlateDetection>>;
}

/// Reads the text of a cropped plate image
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    /// Short backend name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn recognize(&self, plate: &RgbImage) -> Result<Recognition>;

    /// Whether image results outline each character on the saved crop
    fn annotates_characters(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(label: &str, x: f32) -> CharacterBox {
        CharacterBox {
            label: label.to_string(),
            x,
            y: 10.0,
            width: 8.0,
            height: 16.0,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_recognition_sorts_left_to_right() {
        let recognition = Recognition::from_characters(vec![
            character("C", 40.0),
            character("A", 5.0),
            character("B", 20.0),
        ]);
        assert_eq!(recognition.text, "ABC");
        assert_eq!(recognition.characters[0].label, "A");
    }

    #[test]
    fn test_character_bounds_from_centre() {
        let bounds = character("A", 20.0).bounds();
        assert_eq!(bounds, BoundingBox::new(16, 2, 24, 18));
        assert_eq!(character("A", 20.0).left(), 16.0);
    }

    #[test]
    fn test_recognition_empty() {
        let recognition = Recognition::from_characters(vec![]);
        assert!(recognition.text.is_empty());
    }
}
