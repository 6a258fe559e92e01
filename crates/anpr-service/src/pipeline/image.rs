//! Single image plate reading with an annotated copy for the UI.

use super::association::crop_plate;
use super::controller::ActiveRun;
use super::recognition::{persist, read_plate};
use crate::backend::{CharacterBox, PlateDetector, PlateRecognizer};
use crate::error::PipelineError;
use crate::results::{ResultRun, ResultStore};
use crate::store::DetectionStore;
use chrono::Utc;
use common::detections::{DetectionKind, DetectionRecord};
use common::geometry::BoundingBox;
use common::reports::{ImageReport, PlateResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub const ANNOTATED_IMAGE_NAME: &str = "plate_detection.jpg";
const ORIGINAL_IMAGE_NAME: &str = "original.jpg";
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const CHARACTER_PALETTE: [[u8; 3]; 10] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [255, 128, 0],
    [128, 0, 255],
    [0, 128, 255],
    [128, 255, 0],
];
const CHARACTER_ALPHA: f32 = 0.4;

/// Outline `bbox` on `image`, growing inward by [`BOX_THICKNESS`].
pub fn draw_plate_box(image: &mut RgbImage, bbox: &BoundingBox) {
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width() - 2 * inset;
        let height = bbox.height() - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}

/// Outline every character on `crop` in a palette colour blended at
/// [`CHARACTER_ALPHA`]. Returns the colour used for each label; a label seen
/// twice keeps the colour of its last occurrence.
pub fn overlay_characters(crop: &mut RgbImage, characters: &[CharacterBox]) -> BTreeMap<String, [u8; 3]> {
    let mut legend = BTreeMap::new();
    let mut overlay = crop.clone();
    for (i, character) in characters.iter().enumerate() {
        let color = CHARACTER_PALETTE[i % CHARACTER_PALETTE.len()];
        legend.insert(character.label.clone(), color);

        let bounds = character.bounds();
        if bounds.x2 < bounds.x1 || bounds.y2 < bounds.y1 {
            continue;
        }
        let rect = Rect::at(bounds.x1, bounds.y1)
            .of_size((bounds.x2 - bounds.x1 + 1) as u32, (bounds.y2 - bounds.y1 + 1) as u32);
        draw_hollow_rect_mut(&mut overlay, rect, Rgb(color));
    }

    for (base, over) in crop.pixels_mut().zip(overlay.pixels()) {
        for (b, o) in base.0.iter_mut().zip(over.0) {
            *b = (o as f32 * CHARACTER_ALPHA + *b as f32 * (1.0 - CHARACTER_ALPHA)).round() as u8;
        }
    }
    legend
}

fn save_logged(run: &ResultRun, name: &str, image: &RgbImage) {
    if let Err(e) = run.save_jpeg(name, image) {
        warn!(file = name, error = %e, "failed to save result image");
    }
}

#[derive(Clone)]
pub struct ImagePipeline {
    plate_detector: Arc<dyn PlateDetector>,
    store: Arc<dyn DetectionStore>,
    results: ResultStore,
}

impl ImagePipeline {
    pub fn new(plate_detector: Arc<dyn PlateDetector>, store: Arc<dyn DetectionStore>, results: ResultStore) -> Self {
        Self {
            plate_detector,
            store,
            results,
        }
    }

    #[instrument(skip_all, fields(bytes = bytes.len(), recognizer = recognizer.name()))]
    pub async fn run(&self, bytes: &[u8], recognizer: &dyn PlateRecognizer) -> Result<ImageReport, PipelineError> {
        let active = ActiveRun::start("image");
        let started = Instant::now();

        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::InvalidImage(e.to_string()))?
            .to_rgb8();

        let run = self.results.create_run()?;
        save_logged(&run, ORIGINAL_IMAGE_NAME, &image);

        let plates = self.plate_detector.detect(&image).await?;

        let mut annotated = image.clone();
        let mut results = Vec::with_capacity(plates.len());
        for (i, plate) in plates.iter().enumerate() {
            draw_plate_box(&mut annotated, &plate.bbox);

            let mut crop = crop_plate(&image, &plate.bbox);
            if crop.width() == 0 || crop.height() == 0 {
                continue;
            }

            let reading = read_plate(recognizer, &crop).await;
            let char_color_legend = recognizer
                .annotates_characters()
                .then(|| overlay_characters(&mut crop, &reading.characters));
            save_logged(&run, &format!("cropped_plate_{}.jpg", i), &crop);

            let record = DetectionRecord::new(DetectionKind::Image, reading.text.clone(), plate.confidence, Utc::now())
                .with_result_id(run.id())
                .with_processing_time_ms(started.elapsed().as_millis() as u64);
            persist(self.store.as_ref(), record).await;

            results.push(PlateResult {
                bounding_box: plate.bbox.into(),
                confidence: plate.confidence,
                plate_text: reading.text,
                error_message: reading.error,
                char_color_legend,
            });
        }

        save_logged(&run, ANNOTATED_IMAGE_NAME, &annotated);

        info!(
            plates = plates.len(),
            read = results.len(),
            result_id = run.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "image processed"
        );

        active.succeed();
        Ok(ImageReport {
            results,
            result_id: run.id().to_string(),
            annotated_image_url: run.url(ANNOTATED_IMAGE_NAME),
        })
    }
}
