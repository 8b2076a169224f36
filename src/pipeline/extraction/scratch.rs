//! Per-request scratch state.
//!
//! Intermediate images live in memory, keyed by the request that produced
//! them, so two extractions in one process never see each other's artifacts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use super::ExtractionError;

/// A PNG produced by one visual pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    /// File-safe name, e.g. `icd4mm-crop.png`.
    pub name: String,
    #[serde(skip)]
    pub png: Vec<u8>,
    pub size: usize,
}

pub struct ScratchContext {
    request_id: Uuid,
    artifacts: Vec<Artifact>,
}

impl ScratchContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            artifacts: Vec::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Keep an artifact; a later one with the same name replaces it.
    pub fn store(&mut self, name: impl Into<String>, png: Vec<u8>) {
        let name = name.into();
        self.artifacts.retain(|a| a.name != name);
        self.artifacts.push(Artifact {
            size: png.len(),
            name,
            png,
        });
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }
}

impl Default for ScratchContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Write artifacts into `<dir>/<request_id>/`, returning the paths written.
pub fn persist_artifacts(
    dir: &Path,
    request_id: Uuid,
    artifacts: &[Artifact],
) -> Result<Vec<PathBuf>, ExtractionError> {
    let target = dir.join(request_id.to_string());
    std::fs::create_dir_all(&target)?;
    artifacts
        .iter()
        .map(|a| {
            let path = target.join(&a.name);
            std::fs::write(&path, &a.png)?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_are_isolated() {
        let mut a = ScratchContext::new();
        let b = ScratchContext::new();
        assert_ne!(a.request_id(), b.request_id());

        a.store("icd4mm-crop.png", vec![1, 2, 3]);
        assert!(a.get("icd4mm-crop.png").is_some());
        assert!(b.get("icd4mm-crop.png").is_none());
    }

    #[test]
    fn store_replaces_same_name() {
        let mut ctx = ScratchContext::new();
        ctx.store("calcification-crop.png", vec![1]);
        ctx.store("calcification-crop.png", vec![1, 2]);
        let artifacts = ctx.into_artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].size, 2);
    }

    #[test]
    fn persist_writes_under_request_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ScratchContext::new();
        let id = ctx.request_id();
        ctx.store("icd6mm-refined.png", vec![9, 9]);

        let paths = persist_artifacts(dir.path(), id, &ctx.into_artifacts()).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(dir.path().join(id.to_string())));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), vec![9, 9]);
    }
}
