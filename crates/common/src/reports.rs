//! Response contracts for the image and video pipelines and the OCR mode
//! endpoints.

use crate::geometry::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Coarse vehicle category reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Unknown,
}

/// Classes the vehicle tracker is asked to follow.
pub const TRACKED_VEHICLE_CLASSES: [VehicleClass; 4] = [
    VehicleClass::Car,
    VehicleClass::Motorcycle,
    VehicleClass::Bus,
    VehicleClass::Truck,
];

impl VehicleClass {
    /// Map a COCO class index (2 car, 3 motorcycle, 5 bus, 7 truck).
    pub fn from_coco_id(class_id: usize) -> Self {
        match class_id {
            2 => Self::Car,
            3 => Self::Motorcycle,
            5 => Self::Bus,
            7 => Self::Truck,
            _ => Self::Unknown,
        }
    }

    pub fn coco_id(&self) -> Option<usize> {
        match self {
            Self::Car => Some(2),
            Self::Motorcycle => Some(3),
            Self::Bus => Some(5),
            Self::Truck => Some(7),
            Self::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Bus => "bus",
            Self::Truck => "truck",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plate location and detector confidence for one best frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicencePlateDetails {
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// One retained shot of a vehicle after recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestFrame {
    /// Zero-based frame number the shot was captured from
    pub frame_info: u64,
    pub licence_plate_details: LicencePlateDetails,
    /// Recognized text or `OCR_FAILED`
    pub ocr_result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedVehicleReport {
    pub vehicle_id: u32,
    pub vehicle_type: VehicleClass,
    /// Confidence-descending, never empty
    pub best_frames: Vec<BestFrame>,
}

/// Result of a video pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoReport {
    pub tracked_vehicles: Vec<TrackedVehicleReport>,
    pub result_id: String,
}

/// Float coordinates as returned by the image endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateBoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<BoundingBox> for PlateBoundingBox {
    fn from(b: BoundingBox) -> Self {
        Self {
            x1: b.x1 as f32,
            y1: b.y1 as f32,
            x2: b.x2 as f32,
            y2: b.y2 as f32,
        }
    }
}

/// One plate found in a still image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateResult {
    pub bounding_box: PlateBoundingBox,
    pub confidence: f32,
    pub plate_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Outline colour per character label, for recognizers that annotate characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_color_legend: Option<BTreeMap<String, [u8; 3]>>,
}

/// Result of an image pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReport {
    pub results: Vec<PlateResult>,
    pub result_id: String,
    pub annotated_image_url: String,
}

/// Recognition backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    #[default]
    Local,
    Roboflow,
}

impl OcrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Roboflow => "roboflow",
        }
    }
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local" => Ok(Self::Local),
            "roboflow" => Ok(Self::Roboflow),
            other => Err(format!("invalid OCR mode '{}'", other)),
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of the OCR mode endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrModeBody {
    pub ocr_mode: OcrMode,
}
