use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ArtifactError;
use crate::pricing::artifacts::read_json_artifact;
use crate::pricing::features::ResidualFeatures;
use crate::pricing::ResidualEstimator;

/// Weight given to a historical point sitting exactly on the query.
pub const EXACT_MATCH_WEIGHT: f64 = 1e6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub qty_sum: f64,
    pub line_count: f64,
    pub residual: f64,
}

impl HistoricalPoint {
    fn from_row(row: &Value) -> Option<Self> {
        let number = |index: usize| {
            row.get(index).and_then(Value::as_f64).filter(|value| value.is_finite())
        };
        Some(Self { qty_sum: number(0)?, line_count: number(1)?, residual: number(2)? })
    }

    fn distance_to(&self, features: &ResidualFeatures) -> f64 {
        let dq = self.qty_sum - features.qty_sum;
        let dl = self.line_count - f64::from(features.line_count);
        (dq * dq + dl * dl).sqrt()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SimilarityIndexFile {
    version: f64,
    k: f64,
    #[serde(default)]
    buckets: HashMap<String, Value>,
}

/// Historical `(qty_sum, line_count, residual)` observations per bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "SimilarityIndexFile", into = "SimilarityIndexFile")]
pub struct SimilarityIndex {
    pub version: f64,
    pub k: usize,
    pub buckets: HashMap<String, Vec<HistoricalPoint>>,
}

impl From<SimilarityIndexFile> for SimilarityIndex {
    fn from(file: SimilarityIndexFile) -> Self {
        // Rows that are too short or hold anything but finite numbers are
        // dropped; a bucket that is not a list of rows has no points.
        let buckets = file
            .buckets
            .into_iter()
            .map(|(key, rows)| {
                let points = rows
                    .as_array()
                    .map(|rows| rows.iter().filter_map(HistoricalPoint::from_row).collect())
                    .unwrap_or_default();
                (key, points)
            })
            .collect();

        let k = if file.k.is_finite() && file.k > 0.0 { file.k as usize } else { 0 };
        Self { version: file.version, k, buckets }
    }
}

impl From<SimilarityIndex> for SimilarityIndexFile {
    fn from(index: SimilarityIndex) -> Self {
        let buckets = index
            .buckets
            .into_iter()
            .map(|(key, points)| {
                let rows = points
                    .iter()
                    .map(|point| json!([point.qty_sum, point.line_count, point.residual]))
                    .collect();
                (key, Value::Array(rows))
            })
            .collect();

        Self { version: index.version, k: index.k as f64, buckets }
    }
}

impl SimilarityIndex {
    pub const REQUIRED_FIELDS: [&'static str; 2] = ["version", "k"];

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        read_json_artifact(path, &Self::REQUIRED_FIELDS)
    }

    pub fn points(&self, bucket: &str) -> &[HistoricalPoint] {
        self.buckets.get(bucket).map(Vec::as_slice).unwrap_or_default()
    }
}

impl ResidualEstimator for SimilarityIndex {
    fn estimate(&self, features: &ResidualFeatures) -> Option<f64> {
        let points = self.points(features.bucket_key().as_str());
        if points.is_empty() {
            return None;
        }

        let k = self.k.min(points.len());
        let mut ranked: Vec<(f64, f64)> =
            points.iter().map(|point| (point.distance_to(features), point.residual)).collect();
        // Stable sort: equal distances keep their stored order.
        ranked.sort_by(|left, right| left.0.partial_cmp(&right.0).unwrap_or(Ordering::Equal));

        let (weighted_sum, weight_sum) =
            ranked.iter().take(k).fold((0.0, 0.0), |(weighted, total), (distance, residual)| {
                let weight = if *distance == 0.0 { EXACT_MATCH_WEIGHT } else { 1.0 / distance };
                (weighted + weight * residual, total + weight)
            });

        if weight_sum <= 0.0 {
            return None;
        }

        let estimate = weighted_sum / weight_sum;
        estimate.is_finite().then_some(estimate)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::TempDir;

    use super::{HistoricalPoint, SimilarityIndex};
    use crate::domain::quote::{Channel, ServiceType, Timeframe};
    use crate::errors::ArtifactError;
    use crate::pricing::features::ResidualFeatures;
    use crate::pricing::ResidualEstimator;

    const KEY: &str = "supply_only|asap|website|B1";

    fn features(qty_sum: f64, line_count: u32) -> ResidualFeatures {
        ResidualFeatures {
            service_type: ServiceType::SupplyOnly,
            timeframe: Timeframe::Asap,
            channel: Channel::Website,
            postcode_area: "B1".to_string(),
            customer_interaction_channel: String::new(),
            qty_sum,
            line_count,
            customer_satisfaction: 3.0,
            customer_total_purchases: 0,
        }
    }

    fn index(k: usize, rows: &[[f64; 3]]) -> SimilarityIndex {
        let points = rows
            .iter()
            .map(|row| HistoricalPoint { qty_sum: row[0], line_count: row[1], residual: row[2] })
            .collect();
        let mut buckets = HashMap::new();
        buckets.insert(KEY.to_string(), points);
        SimilarityIndex { version: 1.0, k, buckets }
    }

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-6
    }

    #[test]
    fn exact_match_dominates_other_points() {
        let index = index(3, &[[10.0, 4.0, 900.0], [4.0, 2.0, 75.0], [5.0, 2.0, 600.0]]);
        let estimate = index.estimate(&features(4.0, 2)).expect("estimate");
        assert!((estimate - 75.0).abs() < 0.01, "got {estimate}");
    }

    #[test]
    fn uses_every_point_when_bucket_is_smaller_than_k() {
        let index = index(5, &[[3.0, 2.0, 100.0], [6.0, 2.0, 200.0]]);
        // Distances are 1 and 2, so weights are 1 and 0.5.
        let estimate = index.estimate(&features(4.0, 2)).expect("estimate");
        assert!(approx(estimate, (100.0 + 0.5 * 200.0) / 1.5), "got {estimate}");
    }

    #[test]
    fn only_the_k_nearest_points_contribute() {
        let index = index(1, &[[40.0, 9.0, 1_000.0], [5.0, 2.0, 60.0]]);
        assert_eq!(index.estimate(&features(4.0, 2)), Some(60.0));
    }

    #[test]
    fn single_point_bucket_returns_its_residual() {
        let index = index(5, &[[12.0, 3.0, 44.0]]);
        let estimate = index.estimate(&features(4.0, 2)).expect("estimate");
        assert!(approx(estimate, 44.0), "got {estimate}");
    }

    #[test]
    fn empty_or_unknown_bucket_abstains() {
        let index = index(5, &[]);
        assert_eq!(index.estimate(&features(4.0, 2)), None);

        let mut other = features(4.0, 2);
        other.postcode_area = "LS6".to_string();
        assert_eq!(index.estimate(&other), None);
    }

    #[test]
    fn zero_k_abstains() {
        let index = index(0, &[[4.0, 2.0, 10.0]]);
        assert_eq!(index.estimate(&features(4.0, 2)), None);
    }

    #[test]
    fn equal_distances_keep_stored_order() {
        let index = index(1, &[[5.0, 2.0, 10.0], [3.0, 2.0, 90.0]]);
        assert_eq!(index.estimate(&features(4.0, 2)), Some(10.0));
    }

    #[test]
    fn load_parses_rows_and_drops_malformed_points() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("similarity_index.json");
        fs::write(
            &path,
            r#"{"version": 1, "k": 5, "buckets": {"supply_only|asap|website|B1": [[4, 2, 100], [1, 2], [4, null, 100], [4, "2", 1], [4, 2, 140]],
                "supply_only|asap|website|B2": "not rows"}}"#,
        )
        .expect("write");

        let loaded = SimilarityIndex::load(&path).expect("valid index");
        assert_eq!(loaded.k, 5);
        assert_eq!(loaded.points(KEY).len(), 2);
        assert_eq!(loaded.estimate(&features(4.0, 2)), Some(120.0));
        assert!(loaded.points("supply_only|asap|website|B2").is_empty());
    }

    #[test]
    fn load_requires_k() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("similarity_index.json");
        fs::write(&path, r#"{"version": 1, "buckets": {}}"#).expect("write");

        let error = SimilarityIndex::load(&path).expect_err("missing k");
        assert!(matches!(error, ArtifactError::MissingField { field: "k", .. }));
    }
}
