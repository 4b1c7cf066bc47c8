//! Manifest store
//!
//! The manifest is a JSON document declaring every model the host knows how
//! to fetch:
//!
//! ```json
//! {
//!   "models": [
//!     { "model_id": "phi3", "model_source": "HuggingFace",
//!       "base_path": "microsoft/Phi-3-mini-4k-instruct-onnx",
//!       "include_filter": "cpu-int4" },
//!     { "model_id": "m1", "model_source": "Local", "base_path": "/src/m1" }
//!   ]
//! }
//! ```
//!
//! It is parsed once at startup and never mutated afterwards, so lookups take
//! no lock.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that make a manifest document unusable
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Could not read manifest file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest is malformed: {0}")]
    Malformed(String),

    #[error("Manifest entry #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
}

/// Settings for a model hosted on a remote hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSource {
    /// Repository path on the hub, e.g. "microsoft/Phi-3-mini-4k-instruct-onnx"
    pub repo: String,
    /// Substring a remote file name must contain; empty selects every file
    pub include_filter: String,
}

impl HubSource {
    /// Whether a remote file is selected by the include filter
    pub fn includes(&self, file_name: &str) -> bool {
        self.include_filter.is_empty() || file_name.contains(&self.include_filter)
    }
}

/// Where a declared model is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    RemoteHub(HubSource),
    LocalPath(PathBuf),
    /// Unrecognised `model_source`; rejected when a download is attempted
    Unknown { kind: String, base_path: String },
}

impl ModelSource {
    /// Short name used in logs and metrics
    pub fn kind(&self) -> &str {
        match self {
            Self::RemoteHub(_) => "HuggingFace",
            Self::LocalPath(_) => "Local",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// One declared model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub model_id: String,
    pub source: ModelSource,
}

/// Immutable map of declared models
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    /// Create an empty manifest (no declared models)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read and parse a manifest file
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        tracing::info!(path = ?path, "Reading manifest file");

        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let manifest = Self::parse(&content)?;
        tracing::info!(count = manifest.len(), "Read manifest");
        Ok(manifest)
    }

    /// Parse a manifest document
    ///
    /// `model_id` and `base_path` must be strings. A missing or non-string
    /// `model_source` maps to [`ModelSource::Unknown`], and a missing or
    /// non-string `include_filter` means no filtering. A repeated `model_id`
    /// replaces the earlier declaration.
    pub fn parse(document: &str) -> Result<Self, ManifestError> {
        let doc: Value = serde_json::from_str(document)?;

        let Value::Object(root) = doc else {
            return Err(ManifestError::Malformed(
                "top-level value must be an object".to_string(),
            ));
        };

        let models = match root.get("models") {
            None | Some(Value::Null) => return Ok(Self::empty()),
            Some(Value::Array(models)) => models,
            Some(_) => {
                return Err(ManifestError::Malformed(
                    "'models' must be a list".to_string(),
                ));
            }
        };

        let mut entries = HashMap::with_capacity(models.len());
        for (index, model) in models.iter().enumerate() {
            let entry = parse_entry(index, model)?;
            if entries.contains_key(&entry.model_id) {
                tracing::warn!(model_id = %entry.model_id, "Duplicate manifest entry replaces earlier one");
            }
            entries.insert(entry.model_id.clone(), entry);
        }

        Ok(Self { entries })
    }

    /// Build a manifest from already constructed entries
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.model_id.clone(), e))
                .collect(),
        }
    }

    pub fn lookup(&self, model_id: &str) -> Option<&ManifestEntry> {
        self.entries.get(model_id)
    }

    /// Declared model ids, sorted
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(index: usize, model: &Value) -> Result<ManifestEntry, ManifestError> {
    let required = |field: &'static str| {
        model
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ManifestError::MissingField { index, field })
    };

    let model_id = required("model_id")?;
    let base_path = required("base_path")?;

    let kind = model
        .get("model_source")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let include_filter = model
        .get("include_filter")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let source = match kind {
        "HuggingFace" => ModelSource::RemoteHub(HubSource {
            repo: base_path,
            include_filter,
        }),
        "Local" => ModelSource::LocalPath(PathBuf::from(base_path)),
        other => ModelSource::Unknown {
            kind: other.to_string(),
            base_path,
        },
    };

    Ok(ManifestEntry { model_id, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_sources() {
        let manifest = Manifest::parse(
            r#"{
                "models": [
                    {"model_id": "phi3", "model_source": "HuggingFace",
                     "base_path": "microsoft/phi3", "include_filter": "cpu"},
                    {"model_id": "m1", "model_source": "Local", "base_path": "/src/m1"},
                    {"model_id": "odd", "model_source": "S3", "base_path": "bucket/odd"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(
            manifest.lookup("phi3").unwrap().source,
            ModelSource::RemoteHub(HubSource {
                repo: "microsoft/phi3".to_string(),
                include_filter: "cpu".to_string(),
            })
        );
        assert_eq!(
            manifest.lookup("m1").unwrap().source,
            ModelSource::LocalPath(PathBuf::from("/src/m1"))
        );
        assert_eq!(
            manifest.lookup("odd").unwrap().source,
            ModelSource::Unknown {
                kind: "S3".to_string(),
                base_path: "bucket/odd".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_source_and_filter_fall_back() {
        let manifest = Manifest::parse(
            r#"{"models": [{"model_id": "a", "base_path": "x", "include_filter": 7}]}"#,
        )
        .unwrap();

        let entry = manifest.lookup("a").unwrap();
        assert!(matches!(entry.source, ModelSource::Unknown { ref kind, .. } if kind.is_empty()));
    }

    #[test]
    fn test_non_string_filter_means_no_filter() {
        let manifest = Manifest::parse(
            r#"{"models": [{"model_id": "a", "model_source": "HuggingFace",
                            "base_path": "org/a", "include_filter": null}]}"#,
        )
        .unwrap();

        match &manifest.lookup("a").unwrap().source {
            ModelSource::RemoteHub(hub) => assert!(hub.include_filter.is_empty()),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_fields() {
        let err = Manifest::parse(r#"{"models": [{"base_path": "x"}]}"#).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField {
                index: 0,
                field: "model_id"
            }
        ));

        let err = Manifest::parse(r#"{"models": [{"model_id": "a"}, {"model_id": "b"}]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField {
                field: "base_path",
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_last_write_wins() {
        let manifest = Manifest::parse(
            r#"{"models": [
                {"model_id": "a", "model_source": "Local", "base_path": "/first"},
                {"model_id": "a", "model_source": "Local", "base_path": "/second"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.lookup("a").unwrap().source,
            ModelSource::LocalPath(PathBuf::from("/second"))
        );
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            Manifest::parse("not json"),
            Err(ManifestError::Json(_))
        ));
        assert!(matches!(
            Manifest::parse("[]"),
            Err(ManifestError::Malformed(_))
        ));
        assert!(matches!(
            Manifest::parse(r#"{"models": 3}"#),
            Err(ManifestError::Malformed(_))
        ));
    }

    #[test]
    fn test_no_models_key_is_empty() {
        assert!(Manifest::parse("{}").unwrap().is_empty());
        assert!(Manifest::parse(r#"{"models": null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_model_ids_sorted() {
        let manifest = Manifest::parse(
            r#"{"models": [
                {"model_id": "b", "model_source": "Local", "base_path": "/b"},
                {"model_id": "a", "model_source": "Local", "base_path": "/a"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(manifest.model_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_include_filter() {
        let hub = HubSource {
            repo: "org/m".to_string(),
            include_filter: "int4".to_string(),
        };
        assert!(hub.includes("cpu-int4/model.onnx"));
        assert!(!hub.includes("cuda-fp16/model.onnx"));

        let all = HubSource {
            repo: "org/m".to_string(),
            include_filter: String::new(),
        };
        assert!(all.includes("anything"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"models": [{{"model_id": "m1", "model_source": "Local", "base_path": "/src/m1"}}]}}"#
        )
        .unwrap();

        let manifest = Manifest::load(file.path()).unwrap();
        assert!(manifest.lookup("m1").is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(Path::new("/nonexistent/manifest-12345.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }
}
