use crate::backend::local_ocr::DEFAULT_CHARACTER_CLASSES;
use crate::backend::remote_ocr::{RoboflowConfig, DEFAULT_ROBOFLOW_API_URL};
use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionStoreType {
    #[default]
    Memory,
    Postgres,
}

impl DetectionStoreType {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!("Invalid DETECTION_STORE_TYPE '{}' (expected memory or postgres)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnprServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    pub vehicle_model_path: String,
    pub plate_model_path: String,
    pub character_model_path: String,

    /// Character detector labels, one character per class index
    pub character_classes: String,

    /// CPU, CUDA or TensorRT
    pub execution_provider: String,

    /// Where uploads are staged while a pipeline runs
    pub temp_dir: PathBuf,

    /// Where per-run result folders are written and served from
    pub results_dir: PathBuf,

    pub ocr_mode_file: PathBuf,

    pub store_type: DetectionStoreType,
    pub database_url: Option<String>,

    /// Remote recognizer settings; `None` unless key, project and version are all set
    pub roboflow: Option<RoboflowConfig>,
}

impl AnprServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("ANPR_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let store_type = DetectionStoreType::parse(&env::var("DETECTION_STORE_TYPE").unwrap_or_default())?;
        let database_url = env::var("DATABASE_URL").ok();
        if store_type == DetectionStoreType::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when DETECTION_STORE_TYPE=postgres");
        }

        let roboflow = match (
            env::var("ROBOFLOW_API_KEY").ok(),
            env::var("ROBOFLOW_PROJECT").ok(),
            env::var("ROBOFLOW_VERSION").ok(),
        ) {
            (Some(api_key), Some(project), Some(version)) => {
                let api_url =
                    env::var("ROBOFLOW_API_URL").unwrap_or_else(|_| DEFAULT_ROBOFLOW_API_URL.to_string());
                Url::parse(&api_url).context("Invalid ROBOFLOW_API_URL")?;
                Some(RoboflowConfig {
                    api_url,
                    project,
                    version,
                    api_key,
                })
            }
            _ => None,
        };

        Ok(Self {
            bind_addr,
            vehicle_model_path: env::var("VEHICLE_MODEL_PATH")
                .unwrap_or_else(|_| "models/yolov8n.onnx".to_string()),
            plate_model_path: env::var("PLATE_MODEL_PATH")
                .unwrap_or_else(|_| "models/license_plate_detector.onnx".to_string()),
            character_model_path: env::var("CHARACTER_MODEL_PATH")
                .unwrap_or_else(|_| "models/character_detector.onnx".to_string()),
            character_classes: env::var("CHARACTER_CLASSES")
                .unwrap_or_else(|_| DEFAULT_CHARACTER_CLASSES.to_string()),
            execution_provider: env::var("EXECUTION_PROVIDER").unwrap_or_else(|_| "CPU".to_string()),
            temp_dir: env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("anpr")),
            results_dir: env::var("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("results")),
            ocr_mode_file: env::var("OCR_MODE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ocr_mode.txt")),
            store_type,
            database_url,
            roboflow,
        })
    }
}
