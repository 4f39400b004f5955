//! Filesystem side of the pricing artifacts: path resolution and the shared
//! read-parse-validate step used by the bucket and similarity loaders.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::PricingConfig;
use crate::errors::ArtifactError;

pub const BUCKET_STATS_FILE: &str = "bucket_stats.json";
pub const SIMILARITY_INDEX_FILE: &str = "similarity_index.json";
pub const MODEL_FILE: &str = "pricing_residual.onnx";
/// Linear export written by the artifact builder.
pub const LINEAR_MODEL_FILE: &str = "pricing_residual.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub bucket_stats: PathBuf,
    pub similarity_index: PathBuf,
    pub model: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            bucket_stats: dir.join(BUCKET_STATS_FILE),
            similarity_index: dir.join(SIMILARITY_INDEX_FILE),
            model: model_in_dir(dir),
        }
    }

    /// Explicit per-file overrides win over the artifact directory.
    pub fn resolve(config: &PricingConfig) -> Self {
        let defaults = Self::in_dir(&config.artifact_dir);
        Self {
            bucket_stats: config.bucket_stats_path.clone().unwrap_or(defaults.bucket_stats),
            similarity_index: config
                .similarity_index_path
                .clone()
                .unwrap_or(defaults.similarity_index),
            model: config.model_path.clone().unwrap_or(defaults.model),
        }
    }
}

/// The ONNX export wins; the linear export is used only when it is the one
/// present in the directory.
fn model_in_dir(dir: &Path) -> PathBuf {
    let onnx = dir.join(MODEL_FILE);
    let linear = dir.join(LINEAR_MODEL_FILE);
    if !onnx.exists() && linear.exists() {
        linear
    } else {
        onnx
    }
}

/// Read a JSON artifact, require the given top-level numeric fields, then
/// deserialize it into its typed form.
pub(crate) fn read_json_artifact<T: DeserializeOwned>(
    path: &Path,
    required_numbers: &[&'static str],
) -> Result<T, ArtifactError> {
    let raw = fs::read_to_string(path).map_err(|source| ArtifactError::from_io(path, source))?;
    parse_json_artifact(path, &raw, required_numbers)
}

pub(crate) fn parse_json_artifact<T: DeserializeOwned>(
    path: &Path,
    raw: &str,
    required_numbers: &[&'static str],
) -> Result<T, ArtifactError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|source| ArtifactError::Parse { path: path.to_path_buf(), source })?;

    for &field in required_numbers {
        let present = value.get(field).and_then(serde_json::Value::as_f64).is_some();
        if !present {
            return Err(ArtifactError::MissingField { path: path.to_path_buf(), field });
        }
    }

    serde_json::from_value(value)
        .map_err(|source| ArtifactError::Parse { path: path.to_path_buf(), source })
}

pub(crate) fn write_json_artifact<T: Serialize>(path: &Path, artifact: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let encoded = serde_json::to_vec(artifact).map_err(std::io::Error::other)?;
    fs::write(path, encoded)
}
