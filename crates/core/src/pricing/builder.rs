//! Offline construction of the bucket statistics and similarity index from
//! historical quotes.
//!
//! Bucket means are shrunk toward the global mean with an empirical-Bayes
//! factor `alpha = n / (n + sigma2 / tau2)`, where `tau2` is the variance of
//! the bucket means and `sigma2` the bucket's own residual variance (or the
//! global variance when the bucket has none).
//!
//! [`write_artifacts`] also fits the ridge residual model (see
//! [`crate::pricing::trainer`]) and exports it as the linear JSON model.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::customer::CustomerProfile;
use crate::domain::quote::{Channel, ServiceType, Timeframe};
use crate::pricing::artifacts::{write_json_artifact, ArtifactPaths, LINEAR_MODEL_FILE};
use crate::pricing::bucket::{BucketEntry, BucketStats};
use crate::pricing::features::{
    interaction_channel, postcode_area, satisfaction, total_purchases, BucketKey,
    ResidualFeatures,
};
use crate::pricing::neighbor::{HistoricalPoint, SimilarityIndex};
use crate::pricing::trainer::train_residual_model;

pub const ARTIFACT_VERSION: f64 = 1.0;
pub const MAX_POINTS_PER_BUCKET: usize = 200;
pub const SAMPLE_SEED: u64 = 42;
pub const DEFAULT_NEIGHBORS: usize = 5;

const VARIANCE_FLOOR: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no historical observations were supplied")]
    NoObservations,
    #[error("could not read observations `{path}`: {source}")]
    ReadObservations { path: PathBuf, source: std::io::Error },
    #[error("could not parse observations `{path}`: {source}")]
    ParseObservations { path: PathBuf, source: serde_json::Error },
    #[error("ridge fit failed at alpha {alpha}")]
    ModelFit { alpha: f64 },
    #[error("could not write artifact `{path}`: {source}")]
    WriteArtifact { path: PathBuf, source: std::io::Error },
}

/// One priced historical quote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalObservation {
    pub service_type: ServiceType,
    pub timeframe: Timeframe,
    pub channel: Channel,
    #[serde(default)]
    pub site_postcode: Option<String>,
    #[serde(default)]
    pub qty_sum: f64,
    #[serde(default = "default_line_count")]
    pub line_count: f64,
    #[serde(default)]
    pub total_net: f64,
    #[serde(default)]
    pub baseline_subtotal: f64,
    #[serde(default)]
    pub customer: Option<CustomerProfile>,
}

fn default_line_count() -> f64 {
    1.0
}

impl HistoricalObservation {
    /// Uplift over the rule-based subtotal, never negative.
    pub fn residual(&self) -> f64 {
        let residual = self.total_net - self.baseline_subtotal;
        if residual.is_finite() {
            residual.max(0.0)
        } else {
            0.0
        }
    }

    pub fn features(&self) -> ResidualFeatures {
        let customer = self.customer.clone().unwrap_or_default();
        let qty_sum = if self.qty_sum.is_finite() { self.qty_sum.max(0.0) } else { 0.0 };

        ResidualFeatures {
            service_type: self.service_type.clone(),
            timeframe: self.timeframe.clone(),
            channel: self.channel.clone(),
            postcode_area: postcode_area(self.site_postcode.as_deref().unwrap_or("")),
            customer_interaction_channel: interaction_channel(&customer),
            qty_sum,
            line_count: self.line_count.max(1.0).round() as u32,
            customer_satisfaction: satisfaction(&customer),
            customer_total_purchases: total_purchases(&customer),
        }
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(
            &self.service_type,
            &self.timeframe,
            &self.channel,
            &postcode_area(self.site_postcode.as_deref().unwrap_or("")),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BuildSummary {
    pub observations: usize,
    pub buckets: usize,
    pub similarity_points: usize,
    pub global_mean: f64,
    pub model_alpha: f64,
    pub model_cv_mae: Option<f64>,
    pub bucket_stats_path: PathBuf,
    pub similarity_index_path: PathBuf,
    pub model_path: PathBuf,
}

pub fn load_observations(path: &Path) -> Result<Vec<HistoricalObservation>, BuildError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| BuildError::ReadObservations { path: path.to_path_buf(), source })?;
    serde_json::from_str(&raw)
        .map_err(|source| BuildError::ParseObservations { path: path.to_path_buf(), source })
}

fn group_by_bucket(
    observations: &[HistoricalObservation],
) -> BTreeMap<String, Vec<&HistoricalObservation>> {
    let mut groups: BTreeMap<String, Vec<&HistoricalObservation>> = BTreeMap::new();
    for observation in observations {
        groups.entry(observation.bucket_key().0).or_default().push(observation);
    }
    groups
}

pub fn build_bucket_stats(
    observations: &[HistoricalObservation],
) -> Result<BucketStats, BuildError> {
    if observations.is_empty() {
        return Err(BuildError::NoObservations);
    }

    let residuals: Vec<f64> = observations.iter().map(HistoricalObservation::residual).collect();
    let global_mean = mean(&residuals);
    let global_variance = sample_variance(&residuals).max(VARIANCE_FLOOR);

    let groups: Vec<(String, Vec<f64>)> = group_by_bucket(observations)
        .into_iter()
        .map(|(key, members)| (key, members.iter().map(|o| o.residual()).collect()))
        .collect();

    let bucket_means: Vec<f64> = groups.iter().map(|(_, values)| mean(values)).collect();
    let between_variance = sample_variance(&bucket_means).max(VARIANCE_FLOOR);

    let buckets: HashMap<String, BucketEntry> = groups
        .into_iter()
        .zip(bucket_means)
        .map(|((key, values), bucket_mean)| {
            let n = values.len() as f64;
            let variance = sample_variance(&values);
            let sigma2 = if variance > 0.0 { variance } else { global_variance };
            let lambda = sigma2 / between_variance;
            let alpha = if n + lambda > 0.0 { n / (n + lambda) } else { 0.0 };
            let shrink_mean = alpha * bucket_mean + (1.0 - alpha) * global_mean;

            (key, BucketEntry { n, mean: Some(bucket_mean), shrink_mean: Some(shrink_mean) })
        })
        .collect();

    Ok(BucketStats { version: ARTIFACT_VERSION, global_mean, buckets })
}

pub fn build_similarity_index(
    observations: &[HistoricalObservation],
) -> Result<SimilarityIndex, BuildError> {
    if observations.is_empty() {
        return Err(BuildError::NoObservations);
    }

    let buckets = group_by_bucket(observations)
        .into_iter()
        .map(|(key, members)| {
            let points: Vec<HistoricalPoint> = members
                .iter()
                .map(|o| HistoricalPoint {
                    qty_sum: o.qty_sum,
                    line_count: o.line_count.max(1.0),
                    residual: o.residual(),
                })
                .filter(|p| p.qty_sum.is_finite() && p.line_count.is_finite())
                .collect();
            (key, cap_points(points, MAX_POINTS_PER_BUCKET))
        })
        .collect();

    Ok(SimilarityIndex { version: ARTIFACT_VERSION, k: DEFAULT_NEIGHBORS, buckets })
}

/// Seeded sample without replacement, keeping the survivors in their
/// original order.
fn cap_points(points: Vec<HistoricalPoint>, cap: usize) -> Vec<HistoricalPoint> {
    if points.len() <= cap {
        return points;
    }

    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut chosen = rand::seq::index::sample(&mut rng, points.len(), cap).into_vec();
    chosen.sort_unstable();
    chosen.into_iter().map(|index| points[index]).collect()
}

pub fn write_artifacts(
    observations: &[HistoricalObservation],
    out_dir: &Path,
) -> Result<BuildSummary, BuildError> {
    let stats = build_bucket_stats(observations)?;
    let index = build_similarity_index(observations)?;
    let trained = train_residual_model(observations)?;
    let paths = ArtifactPaths::in_dir(out_dir);
    let model_path = out_dir.join(LINEAR_MODEL_FILE);

    write_json_artifact(&paths.bucket_stats, &stats).map_err(|source| {
        BuildError::WriteArtifact { path: paths.bucket_stats.clone(), source }
    })?;
    write_json_artifact(&paths.similarity_index, &index).map_err(|source| {
        BuildError::WriteArtifact { path: paths.similarity_index.clone(), source }
    })?;
    write_json_artifact(&model_path, &trained.model)
        .map_err(|source| BuildError::WriteArtifact { path: model_path.clone(), source })?;

    let summary = BuildSummary {
        observations: observations.len(),
        buckets: stats.buckets.len(),
        similarity_points: index.buckets.values().map(Vec::len).sum(),
        global_mean: stats.global_mean,
        model_alpha: trained.alpha,
        model_cv_mae: trained.cv_mae,
        bucket_stats_path: paths.bucket_stats,
        similarity_index_path: paths.similarity_index,
        model_path,
    };

    info!(
        event_name = "pricing.artifacts.built",
        observations = summary.observations,
        buckets = summary.buckets,
        similarity_points = summary.similarity_points,
        model_alpha = summary.model_alpha,
        out_dir = %out_dir.display(),
        "pricing artifacts written"
    );

    Ok(summary)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let center = mean(values);
    values.iter().map(|value| (value - center).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}
