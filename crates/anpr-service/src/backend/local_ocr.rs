/// Local plate recognition with a YOLO character detector
///
/// Each detected character box carries a class index into `class_names`;
/// the plate text is the labels read left to right.
use super::onnx::{OnnxModelConfig, RawDetection, YoloModel};
use super::{CharacterBox, PlateRecognizer, Recognition};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbImage;

/// Digits followed by uppercase letters, in training class order.
pub const DEFAULT_CHARACTER_CLASSES: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub struct CharacterRecognizer {
    model: YoloModel,
    class_names: Vec<String>,
}

impl CharacterRecognizer {
    pub fn load(config: OnnxModelConfig, class_names: Vec<String>) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load("character_detector", config)?,
            class_names,
        })
    }
}

/// One class name per character of `vocab`.
pub fn class_names_from_vocab(vocab: &str) -> Vec<String> {
    vocab.chars().map(|c| c.to_string()).collect()
}

/// Turn character detections into plate text, ordered by left edge.
pub fn assemble_text(mut detections: Vec<RawDetection>, class_names: &[String]) -> Result<Recognition> {
    detections.sort_by_key(|det| det.bbox.x1);
    let characters = detections
        .into_iter()
        .map(|det| {
            let label = class_names
                .get(det.class_id)
                .ok_or_else(|| anyhow!("character class {} is outside the vocabulary", det.class_id))?;
            Ok(CharacterBox {
                label: label.clone(),
                x: (det.bbox.x1 + det.bbox.x2) as f32 / 2.0,
                y: (det.bbox.y1 + det.bbox.y2) as f32 / 2.0,
                width: det.bbox.width() as f32,
                height: det.bbox.height() as f32,
                confidence: det.confidence,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Recognition::in_order(characters))
}

#[async_trait]
impl PlateRecognizer for CharacterRecognizer {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn recognize(&self, plate: &RgbImage) -> Result<Recognition> {
        let detections = self.model.detect(plate)?;
        assemble_text(detections, &self.class_names)
    }
}
