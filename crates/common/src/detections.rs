//! Detection record contracts shared by the pipelines, the detection store and
//! the statistics endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plate text reported when recognition errored or produced nothing.
pub const OCR_FAILED: &str = "OCR_FAILED";

/// Pipeline that produced a detection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Image,
    Video,
}

impl DetectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Outcome of recognition for one recorded plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
    Success,
    Failed,
}

impl DetectionStatus {
    /// `Success` only for non-empty text that is not the failure sentinel.
    pub fn from_plate_text(plate: &str) -> Self {
        if plate.is_empty() || plate == OCR_FAILED {
            Self::Failed
        } else {
            Self::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Success" => Some(Self::Success),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A persisted recognition event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "type")]
    pub kind: DetectionKind,

    /// Recognized text or [`OCR_FAILED`]
    pub plate: String,

    /// Plate detector confidence
    pub confidence: f32,

    pub status: DetectionStatus,

    pub timestamp: DateTime<Utc>,

    /// Result folder the record's images were written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,

    /// Wall time of the pipeline run that produced the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl DetectionRecord {
    /// Build a record whose status is derived from the plate text.
    pub fn new(
        kind: DetectionKind,
        plate: impl Into<String>,
        confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let plate = plate.into();
        let status = DetectionStatus::from_plate_text(&plate);
        Self {
            kind,
            plate,
            confidence,
            status,
            timestamp,
            result_id: None,
            processing_time_ms: None,
        }
    }

    pub fn with_result_id(mut self, result_id: impl Into<String>) -> Self {
        self.result_id = Some(result_id.into());
        self
    }

    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }
}

/// Aggregate statistics over every stored record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub total_inferences: u64,
    pub avg_confidence: f64,
    /// Percentage of records with status `Failed`
    pub ocr_failure_rate: f64,
    /// Milliseconds, averaged over records that carry a processing time
    pub avg_processing_time: f64,
}

impl DetectionStats {
    /// Compute statistics from raw aggregates, rounding to two decimals.
    pub fn from_aggregates(
        total: u64,
        confidence_sum: f64,
        failures: u64,
        processing_sum_ms: f64,
        processing_count: u64,
    ) -> Self {
        if total == 0 {
            return Self::default();
        }
        let avg_processing_time = if processing_count > 0 {
            round2(processing_sum_ms / processing_count as f64)
        } else {
            0.0
        };
        Self {
            total_inferences: total,
            avg_confidence: round2(confidence_sum / total as f64),
            ocr_failure_rate: round2(failures as f64 / total as f64 * 100.0),
            avg_processing_time,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Record as shown in the recent detections feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentDetection {
    #[serde(rename = "type")]
    pub kind: DetectionKind,
    pub plate: String,
    pub confidence: f32,
    pub status: DetectionStatus,
    /// `%Y-%m-%d %H:%M:%S`, UTC
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
}

impl From<&DetectionRecord> for RecentDetection {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            kind: record.kind,
            plate: record.plate.clone(),
            confidence: record.confidence,
            status: record.status,
            timestamp: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            result_id: record.result_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_from_plate_text() {
        assert_eq!(DetectionStatus::from_plate_text("AB123CD"), DetectionStatus::Success);
        assert_eq!(DetectionStatus::from_plate_text(OCR_FAILED), DetectionStatus::Failed);
        assert_eq!(DetectionStatus::from_plate_text(""), DetectionStatus::Failed);
    }

    #[test]
    fn test_record_serialization() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let record = DetectionRecord::new(DetectionKind::Video, "KA01AB1234", 0.9, ts);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["status"], "Success");
        assert!(json.get("result_id").is_none());
    }

    #[test]
    fn test_stats_rounding() {
        let stats = DetectionStats::from_aggregates(3, 0.5 + 0.7 + 0.9, 1, 300.0, 2);
        assert_eq!(stats.total_inferences, 3);
        assert_eq!(stats.avg_confidence, 0.7);
        assert_eq!(stats.ocr_failure_rate, 33.33);
        assert_eq!(stats.avg_processing_time, 150.0);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("totalInferences").is_some());
        assert!(json.get("ocrFailureRate").is_some());
    }

    #[test]
    fn test_stats_empty() {
        assert_eq!(DetectionStats::from_aggregates(0, 0.0, 0, 0.0, 0), DetectionStats::default());
    }

    #[test]
    fn test_recent_detection_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 5, 9).unwrap();
        let record = DetectionRecord::new(DetectionKind::Image, OCR_FAILED, 0.4, ts);
        let recent = RecentDetection::from(&record);
        assert_eq!(recent.timestamp, "2024-05-01 08:05:09");
        assert_eq!(recent.status, DetectionStatus::Failed);
    }
}
