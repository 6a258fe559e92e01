/// Shared ONNX Runtime plumbing for the YOLOv8 style models
///
/// Every model used by the service (vehicle detector, plate detector and the
/// character detector behind local OCR) has the same output layout:
/// `[batch, 4 + num_classes, num_predictions]` with `cx, cy, w, h` rows
/// followed by one score row per class.
use anyhow::{anyhow, bail, Context, Result};
use common::geometry::BoundingBox;
use image::RgbImage;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct OnnxModelConfig {
    /// Path to the ONNX model file
    pub model_path: String,

    /// Model input size (width and height)
    pub input_size: u32,

    /// Confidence threshold for detections (0.0 to 1.0)
    pub confidence_threshold: f32,

    /// IoU threshold for NMS
    pub iou_threshold: f32,

    /// Maximum number of detections kept per image
    pub max_detections: usize,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    pub execution_provider: String,

    /// GPU device ID (0, 1, 2, etc.)
    pub device_id: i32,

    pub intra_threads: usize,
    pub inter_threads: usize,
}

impl OnnxModelConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
            execution_provider: "CPU".to_string(),
            device_id: 0,
            intra_threads: 4,
            inter_threads: 1,
        }
    }

    pub fn with_execution_provider(mut self, provider: impl Into<String>) -> Self {
        self.execution_provider = provider.into();
        self
    }
}

/// A raw detection in source image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// A loaded YOLO model with its session
pub struct YoloModel {
    name: &'static str,
    config: OnnxModelConfig,
    session: Mutex<Session>,
    execution_provider: String,
}

impl YoloModel {
    /// Load the model named `name` (used in logs and metrics).
    pub fn load(name: &'static str, config: OnnxModelConfig) -> Result<Self> {
        let (session, execution_provider) = create_session(&config)
            .with_context(|| format!("failed to load {} model from {}", name, config.model_path))?;

        tracing::info!(
            model = name,
            path = %config.model_path,
            provider = %execution_provider,
            device = config.device_id,
            "model loaded"
        );

        Ok(Self {
            name,
            config,
            session: Mutex::new(session),
            execution_provider,
        })
    }

    /// Run the model on `image` and return NMS-filtered detections.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            bail!("cannot run {} on an empty image", self.name);
        }

        let input_tensor = Value::from_array(preprocess(image, self.config.input_size))?;

        let inference_start = std::time::Instant::now();
        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow!("Failed to lock {} session: {}", self.name, e))?;
            let outputs = session.run(ort::inputs![input_tensor])?;

            let output_value = outputs
                .get("output0")
                .or_else(|| outputs.get("output"))
                .context("No output tensor found (tried: output0, output)")?;
            let (shape, data) = output_value.try_extract_tensor::<f32>()?;
            let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
            Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?
        };
        let inference_time = inference_start.elapsed();

        telemetry::metrics::ANPR_INFERENCE_TIME
            .with_label_values(&[self.name, &self.execution_provider])
            .observe(inference_time.as_secs_f64());

        let scale_x = width as f32 / self.config.input_size as f32;
        let scale_y = height as f32 / self.config.input_size as f32;
        let candidates =
            decode_predictions(&output, scale_x, scale_y, self.config.confidence_threshold)?;

        let mut kept = non_max_suppression(candidates, self.config.iou_threshold);
        kept.truncate(self.config.max_detections);

        tracing::debug!(
            model = self.name,
            detections = kept.len(),
            inference_ms = inference_time.as_millis() as u64,
            "inference complete"
        );

        Ok(kept)
    }
}

/// Resize to the model input and convert to normalized NCHW.
pub fn preprocess(image: &RgbImage, size: u32) -> Array<f32, IxDyn> {
    let resized = image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);

    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
    for (x, y, pixel) in resized.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }
    input
}

/// Decode `[1, 4 + classes, N]` predictions, scaling boxes back to the
/// source image.
pub fn decode_predictions(
    output: &Array<f32, IxDyn>,
    scale_x: f32,
    scale_y: f32,
    confidence_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] < 5 {
        bail!("unexpected YOLO output shape {:?}", shape);
    }
    let num_classes = shape[1] - 4;
    let num_predictions = shape[2];

    let mut detections = Vec::new();
    for i in 0..num_predictions {
        let mut class_id = 0;
        let mut confidence = output[[0, 4, i]];
        for c in 1..num_classes {
            let score = output[[0, 4 + c, i]];
            if score > confidence {
                confidence = score;
                class_id = c;
            }
        }

        if confidence < confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        detections.push(RawDetection {
            bbox: BoundingBox::from_xyxy_f32(
                ((cx - w / 2.0) * scale_x).max(0.0),
                ((cy - h / 2.0) * scale_y).max(0.0),
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ),
            confidence,
            class_id,
        });
    }

    Ok(detections)
}

/// Class-aware greedy NMS; output is confidence-descending.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Create ONNX session with execution provider fallback
fn create_session(config: &OnnxModelConfig) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            tracing::info!("Attempting TensorRT for {}", config.model_path);
            let result = Session::builder()
                .context("Failed to create session builder")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(config.intra_threads)
                .context("Failed to set intra threads")?
                .with_inter_threads(config.inter_threads)
                .context("Failed to set inter threads")?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .context("Failed to set execution providers")?
                .commit_from_file(&config.model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    tracing::warn!("TensorRT failed, trying CUDA: {}", e);
                    try_cuda(config)
                }
            }
        }
        "CUDA" => try_cuda(config),
        _ => try_cpu(config),
    }
}

fn try_cuda(config: &OnnxModelConfig) -> Result<(Session, String)> {
    tracing::info!("Attempting CUDA for {}", config.model_path);
    let result = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(&config.model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!("CUDA failed, using CPU: {}", e);
            try_cpu(config)
        }
    }
}

fn try_cpu(config: &OnnxModelConfig) -> Result<(Session, String)> {
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .commit_from_file(&config.model_path)
        .context("Failed to load model from file")?;
    Ok((session, "CPU".to_string()))
}
