//! Quote pricing routes backed by the residual runtime.
//!
//! JSON API Endpoints:
//! - `POST /api/v1/pricing/residual`: derive features, blend a residual, price the quote
//! - `GET  /api/v1/pricing/health`: artifact load status and active blend weights
//! - `POST /api/v1/pricing/reset`: drop cached artifacts so the next call reloads them

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reliant_core::config::PricingConfig;
use reliant_core::errors::{ApplicationError, InterfaceError};
use reliant_core::pricing::features::ResidualFeatures;
use reliant_core::pricing::{HealthSnapshot, PricingRuntime, ResidualBreakdown};
use reliant_core::PricingRequest;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PricingState {
    runtime: Arc<PricingRuntime>,
    vat_rate: f64,
    fallback_uplift_pct: f64,
}

impl PricingState {
    pub fn new(runtime: Arc<PricingRuntime>, config: &PricingConfig) -> Self {
        Self {
            runtime,
            vat_rate: config.vat_rate,
            fallback_uplift_pct: config.fallback_uplift_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ResidualRequest {
    #[serde(flatten)]
    pub request: PricingRequest,
    /// Rule-based subtotal computed upstream; enables the priced totals.
    #[serde(default)]
    pub baseline_subtotal: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualSource {
    Blend,
    Fallback,
}

#[derive(Debug, Serialize)]
pub struct PricedTotals {
    pub baseline_subtotal: Decimal,
    pub residual: Decimal,
    pub residual_source: ResidualSource,
    pub net: Decimal,
    pub vat_rate: Decimal,
    pub vat: Decimal,
    pub gross: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ResidualResponse {
    pub correlation_id: String,
    pub features: ResidualFeatures,
    pub breakdown: ResidualBreakdown,
    pub totals: Option<PricedTotals>,
}

#[derive(Debug, Serialize)]
pub struct PricingError {
    pub error: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = PricingError {
            error: self.0.user_message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: PricingState) -> Router {
    Router::new()
        .route("/api/v1/pricing/residual", post(price_residual))
        .route("/api/v1/pricing/health", get(pricing_health))
        .route("/api/v1/pricing/reset", post(reset_caches))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn price_residual(
    State(state): State<PricingState>,
    Json(body): Json<ResidualRequest>,
) -> Result<Json<ResidualResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let features = ResidualFeatures::from_request(&body.request);
    let breakdown = state.runtime.explain_residual(&features).await;

    let totals = match body.baseline_subtotal {
        Some(baseline) => Some(
            price_totals(&state, baseline, breakdown.residual)
                .map_err(|error| reject(error, &correlation_id))?,
        ),
        None => None,
    };

    if breakdown.residual.is_none() {
        warn!(
            event_name = "pricing.residual.abstained",
            correlation_id = %correlation_id,
            bucket_key = %breakdown.bucket_key,
            "every estimator abstained; caller fallback applies"
        );
    }

    info!(
        event_name = "pricing.residual.priced",
        correlation_id = %correlation_id,
        bucket_key = %breakdown.bucket_key,
        contributors = breakdown.contributors(),
        residual = ?breakdown.residual,
        "pricing residual computed"
    );

    Ok(Json(ResidualResponse { correlation_id, features, breakdown, totals }))
}

async fn pricing_health(State(state): State<PricingState>) -> Json<HealthSnapshot> {
    Json(state.runtime.health_snapshot())
}

async fn reset_caches(State(state): State<PricingState>) -> Json<HealthSnapshot> {
    state.runtime.reset_caches();
    Json(state.runtime.health_snapshot())
}

fn price_totals(
    state: &PricingState,
    baseline: Decimal,
    blended: Option<f64>,
) -> Result<PricedTotals, ApplicationError> {
    if baseline.is_sign_negative() {
        return Err(ApplicationError::InvalidRequest(
            "baseline_subtotal must not be negative".to_string(),
        ));
    }

    let (residual, residual_source) = match blended {
        Some(value) => (to_decimal(value, "residual")?, ResidualSource::Blend),
        None => {
            let uplift = to_decimal(state.fallback_uplift_pct, "fallback_uplift_pct")?;
            (baseline * uplift, ResidualSource::Fallback)
        }
    };

    let vat_rate = to_decimal(state.vat_rate, "vat_rate")?;
    let net = money(baseline + residual);
    let vat = money(net * vat_rate);

    Ok(PricedTotals {
        baseline_subtotal: money(baseline),
        residual: money(residual),
        residual_source,
        net,
        vat_rate,
        vat,
        gross: net + vat,
    })
}

fn money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded
}

fn to_decimal(value: f64, field: &str) -> Result<Decimal, ApplicationError> {
    Decimal::from_f64(value).ok_or_else(|| {
        ApplicationError::Configuration(format!("{field} is not representable as a decimal"))
    })
}

fn reject(error: ApplicationError, correlation_id: &str) -> ApiError {
    warn!(
        event_name = "pricing.request.rejected",
        correlation_id = %correlation_id,
        error = %error,
        "pricing request rejected"
    );
    ApiError(error.into_interface(correlation_id))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use reliant_core::config::PricingConfig;
    use reliant_core::pricing::PricingRuntime;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::{price_totals, router, PricingState, ResidualSource};

    fn state(dir: &TempDir, fallback_uplift_pct: f64) -> PricingState {
        let config = PricingConfig {
            artifact_dir: dir.path().to_path_buf(),
            fallback_uplift_pct,
            ..PricingConfig::default()
        };
        PricingState::new(Arc::new(PricingRuntime::from_config(&config)), &config)
    }

    fn write_artifacts(dir: &TempDir) {
        fs::write(
            dir.path().join("bucket_stats.json"),
            r#"{"version": 1, "global_mean": 50, "buckets": {"supply_and_install|asap|website|B1": {"n": 12, "mean": 130, "shrink_mean": 120}}}"#,
        )
        .expect("write bucket stats");
        fs::write(
            dir.path().join("similarity_index.json"),
            r#"{"version": 1, "k": 2, "buckets": {"supply_and_install|asap|website|B1": [[4, 2, 100], [4, 2, 140]]}}"#,
        )
        .expect("write similarity index");
    }

    async fn send(state: PricingState, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");

        let response = router(state).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, payload)
    }

    fn quote_body(baseline: Option<&str>) -> Value {
        let mut body = json!({
            "service_type": "supply_and_install",
            "timeframe": "asap",
            "channel": "website",
            "site_postcode": "b1 1aa",
            "items": [{"item_id": "door-1", "quantity": "3"}, {"quantity": 1}],
        });
        if let Some(baseline) = baseline {
            body["baseline_subtotal"] = json!(baseline);
        }
        body
    }

    #[tokio::test]
    async fn residual_route_blends_and_prices_the_quote() {
        let dir = TempDir::new().expect("tempdir");
        write_artifacts(&dir);

        let (status, payload) = send(
            state(&dir, 0.0),
            "POST",
            "/api/v1/pricing/residual",
            quote_body(Some("1000.00")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["features"]["postcode_area"], "B1");
        assert_eq!(payload["features"]["qty_sum"], 4.0);
        assert_eq!(payload["features"]["line_count"], 2);
        assert_eq!(payload["breakdown"]["bucket_key"], "supply_and_install|asap|website|B1");
        assert_eq!(payload["totals"]["residual_source"], "blend");
        assert_eq!(payload["totals"]["net"], "1120.00");
        assert_eq!(payload["totals"]["vat"], "224.00");
        assert_eq!(payload["totals"]["gross"], "1344.00");
    }

    #[tokio::test]
    async fn residual_route_uses_fallback_uplift_when_engine_abstains() {
        let dir = TempDir::new().expect("tempdir");

        let (status, payload) = send(
            state(&dir, 0.10),
            "POST",
            "/api/v1/pricing/residual",
            quote_body(Some("500")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["breakdown"]["residual"], Value::Null);
        assert_eq!(payload["totals"]["residual_source"], "fallback");
        assert_eq!(payload["totals"]["net"], "550.00");
    }

    #[tokio::test]
    async fn residual_route_without_baseline_returns_breakdown_only() {
        let dir = TempDir::new().expect("tempdir");
        write_artifacts(&dir);

        let (status, payload) =
            send(state(&dir, 0.0), "POST", "/api/v1/pricing/residual", quote_body(None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["totals"], Value::Null);
        let residual = payload["breakdown"]["residual"].as_f64().expect("residual");
        assert!((residual - 120.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn negative_baseline_is_a_bad_request() {
        let dir = TempDir::new().expect("tempdir");

        let (status, payload) = send(
            state(&dir, 0.0),
            "POST",
            "/api/v1/pricing/residual",
            quote_body(Some("-10")),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn reset_route_reports_every_artifact_unloaded() {
        let dir = TempDir::new().expect("tempdir");
        write_artifacts(&dir);
        let state = state(&dir, 0.0);

        let (_, loaded) =
            send(state.clone(), "POST", "/api/v1/pricing/residual", quote_body(None)).await;
        assert!(loaded["breakdown"]["residual"].is_number());

        let (status, health) =
            send(state.clone(), "GET", "/api/v1/pricing/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["bucket_loaded"], true);
        assert_eq!(health["similar_loaded"], true);
        assert_eq!(health["onnx_loaded"], false);
        assert!(health.get("model_loaded").is_none());

        let (status, reset) = send(state, "POST", "/api/v1/pricing/reset", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reset["bucket_loaded"], false);
        assert_eq!(reset["similar_loaded"], false);
        assert_eq!(reset["input_style"], Value::Null);
    }

    #[test]
    fn totals_round_money_to_two_places() {
        let dir = TempDir::new().expect("tempdir");
        let totals = price_totals(&state(&dir, 0.0), Decimal::new(99_999, 3), Some(10.005))
            .expect("totals");

        assert_eq!(totals.residual_source, ResidualSource::Blend);
        assert_eq!(totals.baseline_subtotal, Decimal::new(10_000, 2));
        assert_eq!(totals.net, Decimal::new(11_000, 2));
        assert_eq!(totals.vat, Decimal::new(2_200, 2));
        assert_eq!(totals.gross, Decimal::new(13_200, 2));
    }
}
