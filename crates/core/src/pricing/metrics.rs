//! Offline accuracy report for the blended residual.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pricing::builder::HistoricalObservation;
use crate::pricing::runtime::PricingRuntime;

pub const MAPE_EPSILON: f64 = 1e-6;
pub const HUBER_DELTA: f64 = 50.0;
pub const PINBALL_TAU: f64 = 0.5;
/// Residuals at or above this count as high-uplift quotes.
pub const CLASS_THRESHOLD: f64 = 250.0;
const WORST_BUCKETS: usize = 20;

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    mean_of(actual, predicted, |error| error.abs())
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    mean_of(actual, predicted, |error| error * error).sqrt()
}

/// Mean absolute percentage error, in percent.
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    let total: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(truth, guess)| ((truth - guess) / truth.abs().max(MAPE_EPSILON)).abs())
        .sum();
    100.0 * safe_div(total, actual.len().min(predicted.len()))
}

pub fn huber(actual: &[f64], predicted: &[f64], delta: f64) -> f64 {
    mean_of(actual, predicted, |error| {
        let magnitude = error.abs();
        if magnitude <= delta {
            0.5 * error * error
        } else {
            delta * (magnitude - 0.5 * delta)
        }
    })
}

pub fn pinball(actual: &[f64], predicted: &[f64], tau: f64) -> f64 {
    mean_of(actual, predicted, |error| (tau * error).max((tau - 1.0) * error))
}

/// Coefficient of determination; zero when the actuals have no spread.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let center = actual.iter().sum::<f64>() / actual.len() as f64;
    let total: f64 = actual.iter().map(|truth| (truth - center).powi(2)).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let residual: f64 = actual.iter().zip(predicted).map(|(t, p)| (t - p).powi(2)).sum();
    1.0 - residual / total
}

/// Precision, recall and F1 of the "residual >= threshold" call. Each score
/// is zero when its denominator is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

pub fn threshold_scores(actual: &[f64], predicted: &[f64], threshold: f64) -> ThresholdScores {
    let (mut hits, mut false_alarms, mut misses) = (0_usize, 0_usize, 0_usize);
    for (truth, guess) in actual.iter().zip(predicted) {
        match (*truth >= threshold, *guess >= threshold) {
            (true, true) => hits += 1,
            (false, true) => false_alarms += 1,
            (true, false) => misses += 1,
            (false, false) => {}
        }
    }

    let precision = safe_div(hits as f64, hits + false_alarms);
    let recall = safe_div(hits as f64, hits + misses);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ThresholdScores { precision, recall, f1 }
}

/// MAE of predicting each observation's own bucket mean residual.
pub fn bucket_mean_baseline(observations: &[HistoricalObservation]) -> f64 {
    let mut totals: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for observation in observations {
        let entry = totals.entry(observation.bucket_key().0).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += observation.residual();
    }

    let (truths, means): (Vec<f64>, Vec<f64>) = observations
        .iter()
        .map(|observation| {
            let (count, total) =
                totals.get(observation.bucket_key().as_str()).copied().unwrap_or((0, 0.0));
            (observation.residual(), safe_div(total, count))
        })
        .unzip();
    mae(&truths, &means)
}

fn mean_of(actual: &[f64], predicted: &[f64], loss: impl Fn(f64) -> f64) -> f64 {
    let total: f64 = actual.iter().zip(predicted).map(|(truth, guess)| loss(truth - guess)).sum();
    safe_div(total, actual.len().min(predicted.len()))
}

fn safe_div(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketError {
    pub bucket: String,
    pub samples: usize,
    pub mae: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub samples: usize,
    pub scored: usize,
    pub abstentions: usize,
    pub mae: f64,
    pub rmse: f64,
    pub mape_pct: f64,
    pub r2: f64,
    pub huber_delta50: f64,
    pub pinball_tau0_5: f64,
    /// MAE of always predicting the bucket-statistics global mean.
    pub baseline_mae_global_mean: Option<f64>,
    /// MAE of predicting each observation's in-sample bucket mean.
    pub baseline_mae_bucket_mean: f64,
    pub f1_threshold: f64,
    #[serde(flatten)]
    pub classification: ThresholdScores,
    /// Highest-error buckets first.
    pub worst_buckets: Vec<BucketError>,
}

/// Run the blend over every observation. Observations on which every
/// estimator abstains are counted but not scored.
pub async fn evaluate(
    runtime: &PricingRuntime,
    observations: &[HistoricalObservation],
) -> EvaluationReport {
    let mut actual = Vec::with_capacity(observations.len());
    let mut predicted = Vec::with_capacity(observations.len());
    let mut per_bucket: BTreeMap<String, (usize, f64)> = BTreeMap::new();

    for observation in observations {
        let breakdown = runtime.explain_residual(&observation.features()).await;
        let Some(residual) = breakdown.residual else {
            continue;
        };

        let truth = observation.residual();
        let entry = per_bucket.entry(breakdown.bucket_key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += (truth - residual).abs();
        actual.push(truth);
        predicted.push(residual);
    }

    let baseline_mae_global_mean = runtime.ensure_bucket_stats().map(|stats| {
        let truths: Vec<f64> = observations.iter().map(HistoricalObservation::residual).collect();
        let constant = vec![stats.global_mean; truths.len()];
        mae(&truths, &constant)
    });

    let mut worst_buckets: Vec<BucketError> = per_bucket
        .into_iter()
        .map(|(bucket, (samples, total))| BucketError {
            bucket,
            samples,
            mae: safe_div(total, samples),
        })
        .collect();
    worst_buckets.sort_by(|left, right| right.mae.total_cmp(&left.mae));
    worst_buckets.truncate(WORST_BUCKETS);

    let report = EvaluationReport {
        samples: observations.len(),
        scored: actual.len(),
        abstentions: observations.len() - actual.len(),
        mae: mae(&actual, &predicted),
        rmse: rmse(&actual, &predicted),
        mape_pct: mape(&actual, &predicted),
        r2: r_squared(&actual, &predicted),
        huber_delta50: huber(&actual, &predicted, HUBER_DELTA),
        pinball_tau0_5: pinball(&actual, &predicted, PINBALL_TAU),
        baseline_mae_global_mean,
        baseline_mae_bucket_mean: bucket_mean_baseline(observations),
        f1_threshold: CLASS_THRESHOLD,
        classification: threshold_scores(&actual, &predicted, CLASS_THRESHOLD),
        worst_buckets,
    };

    info!(
        event_name = "pricing.evaluation.completed",
        samples = report.samples,
        scored = report.scored,
        abstentions = report.abstentions,
        mae = report.mae,
        f1 = report.classification.f1,
        "pricing evaluation completed"
    );

    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::{
        bucket_mean_baseline, evaluate, huber, mae, mape, pinball, r_squared, rmse,
        threshold_scores, ThresholdScores, CLASS_THRESHOLD,
    };
    use crate::domain::quote::{Channel, ServiceType, Timeframe};
    use crate::pricing::artifacts::ArtifactPaths;
    use crate::pricing::blend::BlendWeights;
    use crate::pricing::builder::{write_artifacts, HistoricalObservation};
    use crate::pricing::model::LinearModelLoader;
    use crate::pricing::runtime::PricingRuntime;

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn point_losses_match_hand_computed_values() {
        let actual = [100.0, 0.0, 300.0];
        let predicted = [90.0, 20.0, 200.0];

        assert!(approx(mae(&actual, &predicted), 130.0 / 3.0));
        assert!(approx(rmse(&actual, &predicted), (10_500.0_f64 / 3.0).sqrt()));
        // 0.5*10^2 = 50, 0.5*20^2 = 200, 50*(100-25) = 3750
        assert!(approx(huber(&actual, &predicted, 50.0), 4_000.0 / 3.0));
        // Errors 10, -20, 100 at tau 0.5 are 5, 10, 50.
        assert!(approx(pinball(&actual, &predicted, 0.5), 65.0 / 3.0));
    }

    #[test]
    fn mape_floors_zero_actuals() {
        let value = mape(&[0.0, 100.0], &[0.0, 50.0]);
        assert!(approx(value, 25.0));
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(mae(&[], &[]), 0.0);
        assert_eq!(rmse(&[], &[]), 0.0);
        assert_eq!(r_squared(&[], &[]), 0.0);
    }

    #[test]
    fn perfect_predictions_have_unit_r_squared() {
        assert!(approx(r_squared(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0));
    }

    #[test]
    fn threshold_view_counts_hits_false_alarms_and_misses() {
        // Classes: truth [1, 0, 1, 1], predicted [1, 1, 0, 1].
        let scores =
            threshold_scores(&[300.0, 100.0, 260.0, 400.0], &[280.0, 300.0, 100.0, 500.0], 250.0);
        assert!(approx(scores.precision, 2.0 / 3.0));
        assert!(approx(scores.recall, 2.0 / 3.0));
        assert!(approx(scores.f1, 2.0 / 3.0));
    }

    #[test]
    fn threshold_view_is_zero_without_positive_classes() {
        let scores = threshold_scores(&[10.0, 20.0], &[15.0, 5.0], CLASS_THRESHOLD);
        assert_eq!(scores, ThresholdScores::default());
        assert_eq!(threshold_scores(&[], &[], CLASS_THRESHOLD), ThresholdScores::default());
    }

    #[test]
    fn bucket_mean_baseline_uses_in_sample_bucket_means() {
        // M1 mean 50 (errors 10, 10); N7 alone (error 0).
        let observations =
            [observation("M1 1AA", 40.0), observation("M1 2BB", 60.0), observation("N7", 10.0)];
        assert!(approx(bucket_mean_baseline(&observations), 20.0 / 3.0));
        assert_eq!(bucket_mean_baseline(&[]), 0.0);
    }

    fn observation(postcode: &str, residual: f64) -> HistoricalObservation {
        HistoricalObservation {
            service_type: ServiceType::SupplyOnly,
            timeframe: Timeframe::Asap,
            channel: Channel::Phone,
            site_postcode: Some(postcode.to_string()),
            qty_sum: 3.0,
            line_count: 1.0,
            total_net: 500.0 + residual,
            baseline_subtotal: 500.0,
            customer: None,
        }
    }

    #[tokio::test]
    async fn evaluation_scores_blend_against_history() {
        let dir = TempDir::new().expect("tempdir");
        let observations =
            vec![observation("M1 1AA", 40.0), observation("M1 2BB", 60.0), observation("N7", 10.0)];
        write_artifacts(&observations, dir.path()).expect("artifacts");

        let runtime = PricingRuntime::new(
            ArtifactPaths::in_dir(dir.path()),
            BlendWeights::default(),
            Arc::new(LinearModelLoader),
        );
        let report = evaluate(&runtime, &observations).await;

        assert_eq!(report.samples, 3);
        assert_eq!(report.scored, 3);
        assert_eq!(report.abstentions, 0);
        assert!(report.mae >= 0.0);
        assert!(report.baseline_mae_global_mean.is_some());
        assert!(approx(report.baseline_mae_bucket_mean, 20.0 / 3.0));
        assert_eq!(report.f1_threshold, 250.0);
        assert_eq!(report.classification, ThresholdScores::default());
        assert_eq!(report.worst_buckets.len(), 2);

        let encoded = serde_json::to_value(&report).expect("encode report");
        assert_eq!(encoded["f1"], 0.0);
        assert!(encoded["precision"].is_number() && encoded["recall"].is_number());
    }

    #[tokio::test]
    async fn evaluation_without_artifacts_counts_abstentions() {
        let dir = TempDir::new().expect("tempdir");
        let runtime = PricingRuntime::new(
            ArtifactPaths::in_dir(dir.path()),
            BlendWeights::default(),
            Arc::new(LinearModelLoader),
        );

        let report = evaluate(&runtime, &[observation("M1 1AA", 40.0)]).await;
        assert_eq!(report.scored, 0);
        assert_eq!(report.abstentions, 1);
        assert_eq!(report.mae, 0.0);
        assert_eq!(report.baseline_mae_global_mean, None);
        assert!(report.worst_buckets.is_empty());
    }
}
