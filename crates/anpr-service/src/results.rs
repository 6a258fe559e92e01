//! Per-run result folders, served statically under `/results`.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// URL prefix the results directory is mounted at
pub const RESULTS_ROUTE: &str = "/results";

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh result id and create its folder.
    pub fn create_run(&self) -> Result<ResultRun> {
        let id = Uuid::new_v4().to_string();
        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create result folder {}", dir.display()))?;
        Ok(ResultRun { id, dir })
    }
}

#[derive(Debug, Clone)]
pub struct ResultRun {
    id: String,
    dir: PathBuf,
}

impl ResultRun {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_jpeg(&self, name: &str, image: &RgbImage) -> Result<PathBuf> {
        let path = self.dir.join(name);
        image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Public URL of a file in this run's folder
    pub fn url(&self, name: &str) -> String {
        format!("{}/{}/{}", RESULTS_ROUTE, self.id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_folder_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let run = store.create_run().unwrap();

        assert!(run.dir().is_dir());
        assert_eq!(run.url("plate_detection.jpg"), format!("/results/{}/plate_detection.jpg", run.id()));

        let path = run
            .save_jpeg("original.jpg", &RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3])))
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_runs_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let a = store.create_run().unwrap();
        let b = store.create_run().unwrap();
        assert_ne!(a.id(), b.id());
    }
}
