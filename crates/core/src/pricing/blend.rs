use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_BLEND_WEIGHTS: &str = "0.70,0.25,0.05";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    Bucket,
    Neighbor,
    Model,
}

impl EstimatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Neighbor => "neighbor",
            Self::Model => "model",
        }
    }
}

/// Configured trust in each estimator, normalized to sum to one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub bucket: f64,
    pub neighbor: f64,
    pub model: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self::normalized(0.70, 0.25, 0.05)
    }
}

impl BlendWeights {
    /// Negative or non-finite components count as zero. An all-zero triple
    /// is divided by one, leaving every weight at zero.
    pub fn normalized(bucket: f64, neighbor: f64, model: f64) -> Self {
        let [bucket, neighbor, model] = [bucket, neighbor, model].map(sanitize);
        let total = bucket + neighbor + model;
        let denominator = if total > 0.0 { total } else { 1.0 };
        Self {
            bucket: bucket / denominator,
            neighbor: neighbor / denominator,
            model: model / denominator,
        }
    }

    /// Parse `"bucket,neighbor,model"`. Never fails: malformed or missing
    /// components default to zero.
    pub fn parse(raw: &str) -> Self {
        let mut components = raw.split(',').map(|part| part.trim().parse::<f64>().unwrap_or(0.0));
        let bucket = components.next().unwrap_or(0.0);
        let neighbor = components.next().unwrap_or(0.0);
        let model = components.next().unwrap_or(0.0);

        let weights = Self::normalized(bucket, neighbor, model);
        if weights.is_degenerate() {
            warn!(
                event_name = "pricing.blend.degenerate_weights",
                blend_weights = raw,
                "blend weights sum to zero; blended residuals will be zero"
            );
        }
        weights
    }

    pub fn weight(&self, kind: EstimatorKind) -> f64 {
        match kind {
            EstimatorKind::Bucket => self.bucket,
            EstimatorKind::Neighbor => self.neighbor,
            EstimatorKind::Model => self.model,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.bucket + self.neighbor + self.model <= 0.0
    }
}

impl fmt::Display for BlendWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4},{:.4}", self.bucket, self.neighbor, self.model)
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// One estimator's opinion, or its abstention.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorOutcome {
    pub estimator: EstimatorKind,
    pub value: Option<f64>,
    pub configured_weight: f64,
    /// Weight after renormalizing over the contributing estimators only.
    pub applied_weight: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidualBreakdown {
    pub bucket_key: String,
    pub outcomes: Vec<EstimatorOutcome>,
    pub residual: Option<f64>,
}

impl ResidualBreakdown {
    pub fn value_of(&self, kind: EstimatorKind) -> Option<f64> {
        self.outcomes.iter().find(|outcome| outcome.estimator == kind).and_then(|o| o.value)
    }

    pub fn contributors(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.value.is_some()).count()
    }
}

/// Combine whichever estimators produced a value. Weights are renormalized
/// over the contributors so a missing estimator does not drag the residual
/// toward zero. Returns the per-estimator outcomes and the non-negative blend,
/// or `None` when every estimator abstained.
pub fn blend(
    weights: &BlendWeights,
    values: [(EstimatorKind, Option<f64>); 3],
) -> (Vec<EstimatorOutcome>, Option<f64>) {
    let contributing_weight: f64 = values
        .iter()
        .filter(|(_, value)| value.is_some())
        .map(|(kind, _)| weights.weight(*kind))
        .sum();
    let denominator = if contributing_weight > 0.0 { contributing_weight } else { 1.0 };

    let outcomes: Vec<EstimatorOutcome> = values
        .iter()
        .map(|(kind, value)| EstimatorOutcome {
            estimator: *kind,
            value: *value,
            configured_weight: weights.weight(*kind),
            applied_weight: value.map(|_| weights.weight(*kind) / denominator),
        })
        .collect();

    if outcomes.iter().all(|outcome| outcome.value.is_none()) {
        return (outcomes, None);
    }

    let blended: f64 = outcomes
        .iter()
        .filter_map(|outcome| Some(outcome.value? * outcome.applied_weight?))
        .sum();

    (outcomes, Some(blended.max(0.0)))
}
