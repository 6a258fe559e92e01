/// License plate detection with a single-class YOLOv8 model
use super::onnx::{OnnxModelConfig, YoloModel};
use super::{Frame, PlateDetection, PlateDetector};
use anyhow::Result;
use async_trait::async_trait;

pub struct YoloPlateDetector {
    model: YoloModel,
}

impl YoloPlateDetector {
    pub fn load(config: OnnxModelConfig) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load("plate_detector", config)?,
        })
    }
}

#[async_trait]
impl PlateDetector for YoloPlateDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<PlateDetection>> {
        let detections = self.model.detect(frame)?;
        Ok(detections
            .into_iter()
            .map(|det| PlateDetection {
                bbox: det.bbox,
                confidence: det.confidence,
            })
            .collect())
    }
}
