use anyhow::{Context, Result};
use common::reports::OcrMode;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

/// OCR mode persisted as a single word in a text file
pub struct OcrModeStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OcrModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the default mode if no mode has been saved yet.
    pub async fn ensure(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        self.set(OcrMode::default()).await
    }

    /// Current mode. A missing or unreadable file means the default mode.
    pub async fn get(&self) -> OcrMode {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.parse().unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "ignoring stored OCR mode");
                OcrMode::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OcrMode::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read OCR mode");
                OcrMode::default()
            }
        }
    }

    pub async fn set(&self, mode: OcrMode) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, mode.as_str())
            .await
            .with_context(|| format!("failed to write OCR mode to {}", self.path.display()))?;
        tracing::info!(mode = %mode, "OCR mode set");
        Ok(())
    }
}
