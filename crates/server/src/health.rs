use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use reliant_core::pricing::PricingRuntime;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    runtime: Arc<PricingRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub bucket_stats: HealthCheck,
    pub similarity_index: HealthCheck,
    pub model: HealthCheck,
    pub checked_at: String,
}

pub fn router(runtime: Arc<PricingRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { runtime })
}

/// Ready as long as bucket statistics load; the other estimators are optional.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let runtime = &state.runtime;
    let paths = runtime.paths();

    let bucket_stats = artifact_check(
        runtime.ensure_bucket_stats().is_some(),
        &paths.bucket_stats.display().to_string(),
    );
    let similarity_index = artifact_check(
        runtime.ensure_similarity_index().is_some(),
        &paths.similarity_index.display().to_string(),
    );
    let model = artifact_check(
        runtime.ensure_model().await.is_some(),
        &paths.model.display().to_string(),
    );
    let ready = bucket_stats.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "reliant-server runtime initialized".to_string(),
        },
        bucket_stats,
        similarity_index,
        model,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn artifact_check(loaded: bool, path: &str) -> HealthCheck {
    if loaded {
        HealthCheck { status: "ready", detail: format!("loaded from {path}") }
    } else {
        HealthCheck {
            status: "degraded",
            detail: format!("unavailable at {path}; estimator abstains"),
        }
    }
}
