//! Banner, health and warm-up endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use docconv_core::{WarmOutcome, WarmPhase};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(get_root, get_healthz, post_warm),
    components(schemas(HealthResponse, WarmResponse))
)]
pub struct HealthApi;

/// Register banner / health / warm routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_root))
        .route("/healthz", get(get_healthz))
        .route("/warm", post(post_warm))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    #[schema(value_type = String, example = "warmed")]
    pub phase: WarmPhase,
    pub warmed: bool,
    pub warming: bool,
    pub last_error: Option<String>,
    pub last_warm_start: Option<DateTime<Utc>>,
    pub last_warm_end: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WarmResponse {
    pub ok: bool,
    #[schema(value_type = String, example = "warmed")]
    pub phase: WarmPhase,
    pub warmed: bool,
    /// A warm-up is still running in the background.
    pub warming: bool,
    /// The engine was already warm before this request.
    pub already: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Plain-text banner.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses((status = 200, description = "Service is running", body = String))
)]
pub async fn get_root() -> &'static str {
    "docconv API is running. POST a file to /convert/{pptx-to-pdf|pdf-to-pptx|docx-to-pdf|pdf-to-docx}."
}

/// Engine warm state and uptime.
///
/// Reads a snapshot; never waits for an in-flight warm-up.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
pub async fn get_healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.runtime.warm().status();
    Json(HealthResponse {
        ok: true,
        phase: status.phase,
        warmed: status.phase == WarmPhase::Warmed,
        warming: status.phase == WarmPhase::Warming,
        last_error: status.last_error,
        last_warm_start: status.last_warm_start,
        last_warm_end: status.last_warm_end,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

/// Start (or join) an engine warm-up.
///
/// Waits up to the configured warm-wait. `202` means the warm-up is still
/// running in the background.
#[utoipa::path(
    post,
    path = "/warm",
    tag = "health",
    responses(
        (status = 200, description = "Engine is warm", body = WarmResponse),
        (status = 202, description = "Warm-up still running", body = WarmResponse),
        (status = 503, description = "Warm-up failed", body = WarmResponse),
    )
)]
pub async fn post_warm(State(state): State<Arc<AppState>>) -> (StatusCode, Json<WarmResponse>) {
    let warm = state.runtime.warm();
    let already = warm.status().phase == WarmPhase::Warmed;
    match warm.ensure_warm_within(state.runtime.warm_wait()).await {
        Some(WarmOutcome::Warmed) => (
            StatusCode::OK,
            Json(WarmResponse {
                ok: true,
                phase: WarmPhase::Warmed,
                warmed: true,
                warming: false,
                already,
                error: None,
            }),
        ),
        Some(WarmOutcome::Failed { reason }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WarmResponse {
                ok: false,
                phase: warm.status().phase,
                warmed: false,
                warming: false,
                already: false,
                error: Some(reason),
            }),
        ),
        None => (
            StatusCode::ACCEPTED,
            Json(WarmResponse {
                ok: true,
                phase: warm.status().phase,
                warmed: false,
                warming: true,
                already: false,
                error: None,
            }),
        ),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::test_support::{CountingProbe, test_state, test_state_with};

    async fn call(app: axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn healthz_reports_cold_engine() {
        let probe = CountingProbe::new(Duration::ZERO, None);
        let (app, _state, _dir) = test_state(probe.clone(), None);

        let (status, body) = call(app, "GET", "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["phase"], "cold");
        assert_eq!(body["warmed"], false);
        assert!(body["last_error"].is_null());
        assert_eq!(probe.calls(), 0, "health must not start a warm-up");
    }

    #[tokio::test]
    async fn healthz_answers_while_warming() {
        let probe = CountingProbe::new(Duration::from_secs(30), None);
        let (app, state, _dir) = test_state(probe, None);
        let _warming = state.runtime.warm().trigger();

        let (status, body) = tokio::time::timeout(
            Duration::from_millis(500),
            call(app, "GET", "/healthz"),
        )
        .await
        .expect("healthz must not block on warm-up");

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "warming");
        assert_eq!(body["warming"], true);
    }

    #[tokio::test]
    async fn warm_endpoint_warms_once() {
        let probe = CountingProbe::new(Duration::from_millis(20), None);
        let (app, _state, _dir) = test_state(probe.clone(), None);

        let (status, body) = call(app.clone(), "POST", "/warm").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "warmed");
        assert_eq!(body["already"], false);

        let (status, body) = call(app.clone(), "POST", "/warm").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already"], true);
        assert_eq!(body["warming"], false);
        assert_eq!(probe.calls(), 1);

        let (_, health) = call(app, "GET", "/healthz").await;
        assert_eq!(health["warmed"], true);
    }

    #[tokio::test]
    async fn slow_warm_answers_202_while_still_warming() {
        let probe = CountingProbe::new(Duration::from_secs(30), None);
        let (app, _state, _dir) = test_state_with(probe, |cfg| {
            cfg.warm_wait = Duration::from_millis(50);
        });

        let (status, body) = call(app, "POST", "/warm").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["warming"], true);
        assert_eq!(body["already"], false);
        assert_eq!(body["warmed"], false);
    }

    #[tokio::test]
    async fn failed_warm_is_reported() {
        let probe = CountingProbe::new(Duration::ZERO, Some("soffice not found"));
        let (app, _state, _dir) = test_state(probe, None);

        let (status, body) = call(app.clone(), "POST", "/warm").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["phase"], "cold");
        assert_eq!(body["error"], "soffice not found");

        let (_, health) = call(app, "GET", "/healthz").await;
        assert_eq!(health["last_error"], "soffice not found");
    }

    #[tokio::test]
    async fn root_banner_is_plain_text() {
        let text = get_root().await;
        assert!(text.contains("/convert/"));
    }
}
