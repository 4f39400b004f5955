use std::sync::Arc;

use reliant_core::config::AppConfig;
use reliant_core::pricing::PricingRuntime;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<PricingRuntime>,
}

/// Build the pricing runtime and warm its caches. Missing artifacts are
/// logged and left for lazy reloading; they never fail startup.
pub async fn bootstrap_with_config(config: AppConfig) -> Application {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        artifact_dir = %config.pricing.artifact_dir.display(),
        "starting application bootstrap"
    );

    let runtime = Arc::new(PricingRuntime::from_config(&config.pricing));
    runtime.ensure_bucket_stats();
    runtime.ensure_similarity_index();
    runtime.ensure_model().await;

    let snapshot = runtime.health_snapshot();
    info!(
        event_name = "system.bootstrap.artifacts_warmed",
        correlation_id = "bootstrap",
        bucket_loaded = snapshot.bucket_loaded,
        similar_loaded = snapshot.similar_loaded,
        onnx_loaded = snapshot.model_loaded,
        blend_weights = %snapshot.blend_weights,
        "pricing artifacts warmed"
    );

    Application { config, runtime }
}
