//! On-disk encoding database.
//!
//! The database is a flat directory of `*.json` files, one serialized
//! [`FaceModel`] per file. Enrollment tooling writes the files; the gate
//! only reads them at startup.

use crate::types::FaceModel;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot access encoding directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Enrolled faces loaded from the encoding directory.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    models: Vec<FaceModel>,
}

impl Gallery {
    pub fn new(mut models: Vec<FaceModel>) -> Self {
        models.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        Self { models }
    }

    /// Load every `*.json` model in `dir`, creating the directory if absent.
    ///
    /// Unreadable or malformed files are skipped with a warning so one bad
    /// enrollment cannot keep the gate from starting.
    pub fn load(dir: &Path) -> Result<Self, GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: dir.to_path_buf(),
            source,
        };

        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
            tracing::info!(path = %dir.display(), "created empty encoding directory");
        }

        let mut models = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<FaceModel>(&s).map_err(|e| e.to_string()));
            match parsed {
                Ok(model) => models.push(model),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping bad face model");
                }
            }
        }

        let gallery = Self::new(models);
        tracing::debug!(path = %dir.display(), models = gallery.len(), "gallery loaded");
        Ok(gallery)
    }

    pub fn models(&self) -> &[FaceModel] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Distinct identity labels, sorted.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.models.iter().map(|m| m.label.as_str()).collect();
        labels.dedup();
        labels
    }
}
