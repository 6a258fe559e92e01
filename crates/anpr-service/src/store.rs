use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use common::detections::{DetectionKind, DetectionRecord, DetectionStats, DetectionStatus};
use sqlx::PgPool;
use tokio::sync::RwLock;

/// Entries shown by the recent detections feed
pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[async_trait]
pub trait DetectionStore: Send + Sync {
    async fn insert(&self, record: DetectionRecord) -> Result<()>;
    async fn stats(&self) -> Result<DetectionStats>;
    /// Newest first
    async fn recent(&self, limit: usize) -> Result<Vec<DetectionRecord>>;
}

#[derive(Default)]
pub struct MemoryDetectionStore {
    records: RwLock<Vec<DetectionRecord>>,
}

impl MemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DetectionStore for MemoryDetectionStore {
    async fn insert(&self, record: DetectionRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn stats(&self) -> Result<DetectionStats> {
        let records = self.records.read().await;
        let confidence_sum: f64 = records.iter().map(|r| r.confidence as f64).sum();
        let failures = records
            .iter()
            .filter(|r| r.status == DetectionStatus::Failed)
            .count() as u64;
        let timed: Vec<u64> = records.iter().filter_map(|r| r.processing_time_ms).collect();

        Ok(DetectionStats::from_aggregates(
            records.len() as u64,
            confidence_sum,
            failures,
            timed.iter().map(|&ms| ms as f64).sum(),
            timed.len() as u64,
        ))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let records = self.records.read().await;
        let mut newest: Vec<DetectionRecord> = records.iter().rev().cloned().collect();
        newest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        newest.truncate(limit);
        Ok(newest)
    }
}

pub struct PgDetectionStore {
    pool: PgPool,
}

impl PgDetectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to detection database")?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the detections table if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detections (
                id BIGSERIAL PRIMARY KEY,
                kind TEXT NOT NULL,
                plate TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                result_id TEXT,
                processing_time_ms BIGINT,
                detected_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create detections table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS detections_detected_at_idx ON detections (detected_at DESC)")
            .execute(&self.pool)
            .await
            .context("failed to create detections index")?;
        Ok(())
    }

    fn map_row(row: sqlx::postgres::PgRow) -> Result<DetectionRecord> {
        use sqlx::Row;

        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let processing_time_ms: Option<i64> = row.try_get("processing_time_ms")?;

        Ok(DetectionRecord {
            kind: DetectionKind::parse(&kind).ok_or_else(|| anyhow!("unknown detection kind '{}'", kind))?,
            plate: row.try_get("plate")?,
            confidence: row.try_get("confidence")?,
            status: DetectionStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown detection status '{}'", status))?,
            timestamp: row.try_get("detected_at")?,
            result_id: row.try_get("result_id")?,
            processing_time_ms: processing_time_ms.map(|ms| ms.max(0) as u64),
        })
    }
}

#[async_trait]
impl DetectionStore for PgDetectionStore {
    async fn insert(&self, record: DetectionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO detections (kind, plate, confidence, status, result_id, processing_time_ms, detected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.plate)
        .bind(record.confidence)
        .bind(record.status.as_str())
        .bind(record.result_id.as_deref())
        .bind(record.processing_time_ms.map(|ms| ms as i64))
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .context("failed to insert detection")?;
        Ok(())
    }

    async fn stats(&self) -> Result<DetectionStats> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(confidence), 0)::FLOAT8 AS confidence_sum,
                COUNT(*) FILTER (WHERE status = 'Failed') AS failures,
                COALESCE(SUM(processing_time_ms), 0)::FLOAT8 AS processing_sum,
                COUNT(processing_time_ms) AS processing_count
            FROM detections
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate detections")?;

        let total: i64 = row.try_get("total")?;
        let failures: i64 = row.try_get("failures")?;
        let processing_count: i64 = row.try_get("processing_count")?;

        Ok(DetectionStats::from_aggregates(
            total.max(0) as u64,
            row.try_get("confidence_sum")?,
            failures.max(0) as u64,
            row.try_get("processing_sum")?,
            processing_count.max(0) as u64,
        ))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, plate, confidence, status, result_id, processing_time_ms, detected_at
            FROM detections
            ORDER BY detected_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to list recent detections")?;

        rows.into_iter().map(Self::map_row).collect()
    }
}
