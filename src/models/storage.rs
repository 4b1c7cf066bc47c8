//! On-disk model layout
//!
//! ```text
//! <models_dir>/
//! ├── m1/            complete model, registered as downloaded
//! │   ├── model.onnx
//! │   └── tokenizer.json
//! └── m2.tmp/        staging area of an in-flight download, never a model
//! ```

use std::path::{Path, PathBuf};

/// Suffix of staging directories
pub const STAGING_SUFFIX: &str = ".tmp";

/// Final directory for a model
pub fn model_dir(models_dir: &Path, model_id: &str) -> PathBuf {
    models_dir.join(model_id)
}

/// Staging directory paired with a final destination (`<destination>.tmp`)
pub fn staging_dir(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Whether a directory name denotes a staging area
pub fn is_staging_name(name: &str) -> bool {
    name.ends_with(STAGING_SUFFIX)
}

/// Model ids are used verbatim as directory names
pub fn is_valid_model_id(model_id: &str) -> bool {
    !model_id.is_empty()
        && model_id != "."
        && model_id != ".."
        && !model_id.contains('/')
        && !model_id.contains('\\')
        && !is_staging_name(model_id)
}

/// A model directory found by [`discover_downloaded`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModel {
    pub model_id: String,
    pub path: PathBuf,
}

/// Scan the models directory for previously downloaded models
///
/// Every subdirectory is a downloaded model named by its directory name.
/// Leftover staging directories from an interrupted download are removed.
/// The models directory is created if it does not exist.
pub async fn discover_downloaded(models_dir: &Path) -> std::io::Result<Vec<DiscoveredModel>> {
    tokio::fs::create_dir_all(models_dir).await?;

    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(models_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }

        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = ?path, "Skipping model directory with non UTF-8 name");
            continue;
        };

        if is_staging_name(&name) {
            tracing::warn!(path = ?path, "Removing stale staging directory");
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                tracing::error!(path = ?path, error = %e, "Failed to remove stale staging directory");
            }
            continue;
        }

        found.push(DiscoveredModel {
            model_id: name,
            path,
        });
    }

    found.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    Ok(found)
}

/// Total size of all files below a directory in bytes
pub fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                Ok(meta) => total += meta.len(),
                Err(_) => {}
            }
        }
    }

    total
}
