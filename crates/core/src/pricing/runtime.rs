//! Lazily loaded pricing artifacts and the blended residual entry point.
//!
//! [`PricingRuntime`] owns three independent cache slots. Bucket statistics
//! and the similarity index are re-read from disk by every call that finds
//! their slot empty. The model slot remembers a failed load as
//! `Unavailable` and is only retried after [`PricingRuntime::reset_caches`].
//! Reset is not coordinated with in-flight requests: a request racing a
//! reset may see either the old or the reloaded artifact.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PricingConfig;
use crate::errors::ArtifactError;
use crate::pricing::artifacts::ArtifactPaths;
use crate::pricing::blend::{blend, BlendWeights, EstimatorKind, ResidualBreakdown};
use crate::pricing::bucket::BucketStats;
use crate::pricing::features::ResidualFeatures;
use crate::pricing::model::{ArtifactModelLoader, ModelHandle, ModelInputStyle, ModelLoader};
use crate::pricing::neighbor::SimilarityIndex;
use crate::pricing::ResidualEstimator;

#[derive(Clone, Debug)]
enum ModelSlot {
    Ready(ModelHandle),
    Unavailable,
}

impl ModelSlot {
    fn handle(&self) -> Option<ModelHandle> {
        match self {
            Self::Ready(handle) => Some(handle.clone()),
            Self::Unavailable => None,
        }
    }
}

/// Read-only diagnostics for operators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Serialized under the operator-facing name used by the health routes.
    #[serde(rename = "onnx_loaded")]
    pub model_loaded: bool,
    pub similar_loaded: bool,
    pub bucket_loaded: bool,
    pub model_path: String,
    pub simidx_path: String,
    pub bucket_path: String,
    pub blend_weights: BlendWeights,
    /// `None` until a model load has been attempted.
    pub input_style: Option<ModelInputStyle>,
}

pub struct PricingRuntime {
    paths: ArtifactPaths,
    weights: BlendWeights,
    loader: Arc<dyn ModelLoader>,
    bucket_stats: RwLock<Option<Arc<BucketStats>>>,
    similarity_index: RwLock<Option<Arc<SimilarityIndex>>>,
    model: RwLock<Option<ModelSlot>>,
}

impl std::fmt::Debug for PricingRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingRuntime")
            .field("paths", &self.paths)
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

impl PricingRuntime {
    pub fn new(paths: ArtifactPaths, weights: BlendWeights, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            paths,
            weights,
            loader,
            bucket_stats: RwLock::new(None),
            similarity_index: RwLock::new(None),
            model: RwLock::new(None),
        }
    }

    pub fn from_config(config: &PricingConfig) -> Self {
        Self::new(
            ArtifactPaths::resolve(config),
            config.blend_weights(),
            Arc::new(ArtifactModelLoader),
        )
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn weights(&self) -> &BlendWeights {
        &self.weights
    }

    pub fn ensure_bucket_stats(&self) -> Option<Arc<BucketStats>> {
        if let Some(cached) = read_slot(&self.bucket_stats) {
            return Some(cached);
        }

        let loaded = load_artifact("bucket_stats", &self.paths.bucket_stats, BucketStats::load)?;
        store_slot(&self.bucket_stats, Some(Arc::clone(&loaded)));
        Some(loaded)
    }

    pub fn ensure_similarity_index(&self) -> Option<Arc<SimilarityIndex>> {
        if let Some(cached) = read_slot(&self.similarity_index) {
            return Some(cached);
        }

        let loaded = load_artifact(
            "similarity_index",
            &self.paths.similarity_index,
            SimilarityIndex::load,
        )?;
        store_slot(&self.similarity_index, Some(Arc::clone(&loaded)));
        Some(loaded)
    }

    /// Load the model once. A failed attempt is remembered until reset.
    pub async fn ensure_model(&self) -> Option<ModelHandle> {
        if let Some(slot) = read_slot(&self.model) {
            return slot.handle();
        }

        let slot = match self.loader.load(&self.paths.model).await {
            Ok(session) => {
                let handle = ModelHandle::new(session);
                info!(
                    event_name = "pricing.artifact.loaded",
                    artifact = "model",
                    path = %self.paths.model.display(),
                    input_style = ?handle.style(),
                    "pricing model loaded"
                );
                ModelSlot::Ready(handle)
            }
            Err(error) => {
                log_unavailable("model", &self.paths.model, &error);
                ModelSlot::Unavailable
            }
        };

        store_slot(&self.model, Some(slot.clone()));
        slot.handle()
    }

    pub fn bucket_estimate(&self, features: &ResidualFeatures) -> Option<f64> {
        self.ensure_bucket_stats()?.estimate(features)
    }

    pub fn neighbor_estimate(&self, features: &ResidualFeatures) -> Option<f64> {
        self.ensure_similarity_index()?.estimate(features)
    }

    pub async fn model_estimate(&self, features: &ResidualFeatures) -> Option<f64> {
        self.ensure_model().await?.estimate(features).await
    }

    /// Raw model output for a fixed-order numeric vector; single-input models only.
    pub async fn predict_vector(&self, vector: &[f32]) -> Option<f64> {
        self.ensure_model().await?.predict_vector(vector).await
    }

    pub async fn explain_residual(&self, features: &ResidualFeatures) -> ResidualBreakdown {
        let bucket_key = features.bucket_key();
        let bucket = self.bucket_estimate(features);
        let neighbor = self.neighbor_estimate(features);
        let model = self.model_estimate(features).await;

        let (outcomes, residual) = blend(
            &self.weights,
            [
                (EstimatorKind::Bucket, bucket),
                (EstimatorKind::Neighbor, neighbor),
                (EstimatorKind::Model, model),
            ],
        );

        debug!(
            event_name = "pricing.residual.blended",
            bucket_key = %bucket_key,
            bucket = ?bucket,
            neighbor = ?neighbor,
            model = ?model,
            residual = ?residual,
            "residual blended"
        );

        ResidualBreakdown { bucket_key: bucket_key.0, outcomes, residual }
    }

    /// Blended, non-negative residual, or `None` when every estimator abstains.
    pub async fn predict_residual(&self, features: &ResidualFeatures) -> Option<f64> {
        self.explain_residual(features).await.residual
    }

    pub fn reset_caches(&self) {
        store_slot(&self.bucket_stats, None);
        store_slot(&self.similarity_index, None);
        store_slot(&self.model, None);
        info!(event_name = "pricing.caches.reset", "pricing artifact caches cleared");
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let model = read_slot(&self.model);
        let input_style = model.as_ref().map(|slot| match slot {
            ModelSlot::Ready(handle) => handle.style(),
            ModelSlot::Unavailable => ModelInputStyle::Unavailable,
        });

        HealthSnapshot {
            model_loaded: matches!(model, Some(ModelSlot::Ready(_))),
            similar_loaded: read_slot(&self.similarity_index).is_some(),
            bucket_loaded: read_slot(&self.bucket_stats).is_some(),
            model_path: self.paths.model.display().to_string(),
            simidx_path: self.paths.similarity_index.display().to_string(),
            bucket_path: self.paths.bucket_stats.display().to_string(),
            blend_weights: self.weights,
            input_style,
        }
    }
}

fn load_artifact<T>(
    artifact: &'static str,
    path: &Path,
    load: impl FnOnce(&Path) -> Result<T, ArtifactError>,
) -> Option<Arc<T>> {
    match load(path) {
        Ok(value) => {
            info!(
                event_name = "pricing.artifact.loaded",
                artifact,
                path = %path.display(),
                "pricing artifact loaded"
            );
            Some(Arc::new(value))
        }
        Err(error) => {
            log_unavailable(artifact, path, &error);
            None
        }
    }
}

fn log_unavailable(artifact: &'static str, path: &Path, error: &ArtifactError) {
    warn!(
        event_name = "pricing.artifact.unavailable",
        artifact,
        path = %path.display(),
        reason_code = error.reason_code(),
        error = %error,
        "pricing artifact unavailable; estimator abstains"
    );
}

fn read_slot<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn store_slot<T>(slot: &RwLock<Option<T>>, value: Option<T>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
}
