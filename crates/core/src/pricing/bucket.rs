use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ArtifactError;
use crate::pricing::artifacts::read_json_artifact;
use crate::pricing::features::ResidualFeatures;
use crate::pricing::ResidualEstimator;

/// One bucket's statistics. Entries are read leniently: a field that is not
/// a number reads as absent instead of failing the whole artifact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct BucketEntry {
    pub n: f64,
    pub mean: Option<f64>,
    /// Precomputed offline; the runtime never re-derives shrinkage.
    pub shrink_mean: Option<f64>,
}

impl From<Value> for BucketEntry {
    fn from(raw: Value) -> Self {
        let number = |field: &str| raw.get(field).and_then(Value::as_f64);
        Self {
            n: number("n").filter(|n| n.is_finite()).unwrap_or(0.0),
            mean: number("mean"),
            shrink_mean: number("shrink_mean"),
        }
    }
}

/// Shrinkage-adjusted mean residual per bucket, with a dataset-wide prior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub version: f64,
    pub global_mean: f64,
    #[serde(default)]
    pub buckets: HashMap<String, BucketEntry>,
}

impl BucketStats {
    pub const REQUIRED_FIELDS: [&'static str; 2] = ["version", "global_mean"];

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        read_json_artifact(path, &Self::REQUIRED_FIELDS)
    }

    fn global_prior(&self) -> Option<f64> {
        self.global_mean.is_finite().then_some(self.global_mean)
    }
}

impl ResidualEstimator for BucketStats {
    fn estimate(&self, features: &ResidualFeatures) -> Option<f64> {
        let key = features.bucket_key();
        let bucket_mean = self
            .buckets
            .get(key.as_str())
            .and_then(|entry| entry.shrink_mean)
            .filter(|value| value.is_finite());

        bucket_mean.or_else(|| self.global_prior())
    }
}
