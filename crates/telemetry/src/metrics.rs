use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Pipeline Metrics ====
    pub static ref ANPR_ACTIVE_PIPELINES: IntGauge = {
        let metric = IntGauge::new("anpr_active_pipelines", "Number of pipeline runs in progress")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANPR_PIPELINE_RUNS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("anpr_pipeline_runs_total", "Total number of pipeline runs"),
            &["pipeline", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANPR_PIPELINE_DURATION: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "anpr_pipeline_duration_seconds",
                "Wall time of a full pipeline run",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["pipeline"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANPR_FRAMES_PROCESSED: IntCounter = {
        let metric = IntCounter::new(
            "anpr_frames_processed_total",
            "Total number of video frames run through association",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANPR_SHOTS_ADMITTED: IntCounter = {
        let metric = IntCounter::new(
            "anpr_shots_admitted_total",
            "Total number of plate shots offered to vehicle ledgers",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANPR_RECOGNITIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("anpr_recognitions_total", "Total number of plate recognitions"),
            &["backend", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANPR_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "anpr_inference_time_seconds",
                "Time spent on model inference (excluding pre/post processing)",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
            &["model", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_metrics_accessible() {
        ANPR_ACTIVE_PIPELINES.set(2);
        assert_eq!(ANPR_ACTIVE_PIPELINES.get(), 2);

        ANPR_PIPELINE_RUNS.with_label_values(&["video", "success"]).inc();
        assert!(ANPR_PIPELINE_RUNS.with_label_values(&["video", "success"]).get() >= 1);
    }

    #[test]
    fn test_encode_metrics_contains_registered_names() {
        ANPR_FRAMES_PROCESSED.inc();
        ANPR_RECOGNITIONS.with_label_values(&["local", "success"]).inc();

        let text = encode_metrics().unwrap();
        assert!(text.contains("anpr_frames_processed_total"));
        assert!(text.contains("anpr_recognitions_total"));
    }
}
