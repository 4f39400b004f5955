pub mod artifacts;
pub mod blend;
pub mod bucket;
pub mod builder;
pub mod features;
pub mod metrics;
pub mod model;
pub mod neighbor;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod runtime;
pub mod trainer;

use self::features::ResidualFeatures;

pub use self::artifacts::ArtifactPaths;
pub use self::blend::{BlendWeights, EstimatorKind, EstimatorOutcome, ResidualBreakdown};
pub use self::bucket::{BucketEntry, BucketStats};
pub use self::model::{
    ArtifactModelLoader, InferenceSession, LinearModelLoader, ModelHandle, ModelInputStyle,
    ModelLoader,
};
pub use self::neighbor::{HistoricalPoint, SimilarityIndex};
pub use self::runtime::{HealthSnapshot, PricingRuntime};

/// A synchronous, in-memory residual estimator. `None` means "no opinion".
pub trait ResidualEstimator: Send + Sync {
    fn estimate(&self, features: &ResidualFeatures) -> Option<f64>;
}
