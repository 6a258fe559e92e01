/// Vehicle detection with a COCO-trained YOLOv8 model
use super::onnx::{OnnxModelConfig, RawDetection, YoloModel};
use super::{Frame, VehicleDetection, VehicleDetector};
use anyhow::Result;
use async_trait::async_trait;
use common::reports::VehicleClass;

pub struct YoloVehicleDetector {
    model: YoloModel,
}

impl YoloVehicleDetector {
    pub fn load(config: OnnxModelConfig) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load("vehicle_detector", config)?,
        })
    }
}

/// Keep detections whose COCO class is one of `classes`.
pub fn filter_vehicle_classes(detections: Vec<RawDetection>, classes: &[VehicleClass]) -> Vec<VehicleDetection> {
    detections
        .into_iter()
        .filter_map(|det| {
            let class = VehicleClass::from_coco_id(det.class_id);
            (class != VehicleClass::Unknown && classes.contains(&class)).then_some(VehicleDetection {
                bbox: det.bbox,
                class,
                confidence: det.confidence,
            })
        })
        .collect()
}

#[async_trait]
impl VehicleDetector for YoloVehicleDetector {
    async fn detect_vehicles(
        &self,
        frame: &Frame,
        classes: &[VehicleClass],
    ) -> Result<Vec<VehicleDetection>> {
        let detections = self.model.detect(frame)?;
        Ok(filter_vehicle_classes(detections, classes))
    }
}
