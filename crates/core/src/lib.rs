pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::customer::CustomerProfile;
pub use domain::quote::{Channel, PricingRequest, RequestItem, ServiceType, Timeframe};
pub use errors::{ApplicationError, ArtifactError, InferenceError, InterfaceError};
pub use pricing::features::ResidualFeatures;
pub use pricing::{
    ArtifactPaths, BlendWeights, EstimatorKind, HealthSnapshot, PricingRuntime, ResidualBreakdown,
    ResidualEstimator,
};
