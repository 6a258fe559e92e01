use anpr_service::backend::local_ocr::{class_names_from_vocab, CharacterRecognizer};
use anpr_service::backend::onnx::OnnxModelConfig;
use anpr_service::backend::plate_detector::YoloPlateDetector;
use anpr_service::backend::remote_ocr::RoboflowRecognizer;
use anpr_service::backend::tracker::TrackerConfig;
use anpr_service::backend::vehicle_detector::YoloVehicleDetector;
use anpr_service::backend::{PlateDetector, PlateRecognizer, VehicleDetector};
use anpr_service::config::DetectionStoreType;
use anpr_service::ocr_mode::OcrModeStore;
use anpr_service::results::ResultStore;
use anpr_service::store::{DetectionStore, MemoryDetectionStore, PgDetectionStore};
use anpr_service::{api, AnprServiceConfig, AnprServiceState, Backends};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Load an optional model, logging instead of failing startup.
fn load_model<T>(what: &str, load: impl FnOnce() -> Result<T>) -> Option<T> {
    match load() {
        Ok(model) => Some(model),
        Err(e) => {
            error!(model = what, error = %format!("{:#}", e), "model not loaded");
            None
        }
    }
}

fn load_backends(config: &AnprServiceConfig) -> Backends {
    let onnx = |path: &str| OnnxModelConfig::new(path).with_execution_provider(config.execution_provider.clone());

    let vehicle_detector = load_model("vehicle detector", || {
        YoloVehicleDetector::load(onnx(&config.vehicle_model_path))
    })
    .map(|d| Arc::new(d) as Arc<dyn VehicleDetector>);

    let plate_detector = load_model("plate detector", || YoloPlateDetector::load(onnx(&config.plate_model_path)))
        .map(|d| Arc::new(d) as Arc<dyn PlateDetector>);

    let local_recognizer = load_model("character detector", || {
        CharacterRecognizer::load(
            onnx(&config.character_model_path),
            class_names_from_vocab(&config.character_classes),
        )
    })
    .map(|r| Arc::new(r) as Arc<dyn PlateRecognizer>);

    let remote_recognizer = match &config.roboflow {
        Some(roboflow) => load_model("roboflow", || RoboflowRecognizer::new(roboflow.clone()))
            .map(|r| Arc::new(r) as Arc<dyn PlateRecognizer>),
        None => {
            info!("Roboflow not configured, remote OCR disabled");
            None
        }
    };

    Backends {
        tracker: vehicle_detector.map(|d| Backends::tracker_from_detector(d, TrackerConfig::default())),
        plate_detector,
        local_recognizer,
        remote_recognizer,
        ..Backends::default()
    }
}

async fn open_store(config: &AnprServiceConfig) -> Result<Arc<dyn DetectionStore>> {
    match (config.store_type, config.database_url.as_deref()) {
        (DetectionStoreType::Postgres, Some(url)) => {
            info!("Using Postgres detection store");
            Ok(Arc::new(PgDetectionStore::connect(url).await?))
        }
        _ => {
            info!("Using in-memory detection store");
            Ok(Arc::new(MemoryDetectionStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("anpr-service");

    info!("Starting ANPR Service...");

    let config = AnprServiceConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        results = %config.results_dir.display(),
        provider = %config.execution_provider,
        "ANPR Service configuration loaded"
    );

    std::fs::create_dir_all(&config.results_dir)
        .with_context(|| format!("failed to create {}", config.results_dir.display()))?;

    let ocr_mode = OcrModeStore::new(&config.ocr_mode_file);
    ocr_mode.ensure().await?;
    info!(mode = %ocr_mode.get().await, "OCR mode");

    let backends = load_backends(&config);
    let store = open_store(&config).await?;

    let state = AnprServiceState::new(
        backends,
        store,
        ocr_mode,
        ResultStore::new(&config.results_dir),
        &config.temp_dir,
    );
    if !state.models_loaded() {
        warn!("Not all models are loaded; pipeline endpoints will answer 503");
    }

    let app = api::router(state);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("ANPR Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("ANPR Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
