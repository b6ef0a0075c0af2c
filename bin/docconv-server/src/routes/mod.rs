//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection, body limit)
//! - Banner, health and warm routes
//! - `/convert/{route}` upload routes
//! - The OpenAPI document at `/api-docs/openapi.json`

mod convert;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Json, Router, middleware};
use tower::ServiceBuilder;

use crate::error::ServerError;
use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Room for multipart boundaries and the small text fields around the file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    // The upload handler enforces the exact file limit while streaming; this
    // only stops oversized bodies from being read at all.
    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(health::router())
        .merge(convert::router())
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(doc::get_docs()) }),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

async fn not_found(uri: axum::http::Uri) -> ServerError {
    ServerError::NotFound(format!("no route for {}", uri.path()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use docconv_core::ConversionError;
    use docconv_core::api::{EngineProbe, Runtime};

    use crate::config::Config;
    use crate::state::AppState;

    /// Probe that counts calls instead of starting an engine.
    pub struct CountingProbe {
        calls: AtomicUsize,
        delay: Duration,
        fail_with: Option<String>,
    }

    impl CountingProbe {
        pub fn new(delay: Duration, fail_with: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail_with: fail_with.map(str::to_owned),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EngineProbe for CountingProbe {
        async fn probe(&self) -> Result<(), ConversionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.fail_with {
                Some(reason) => Err(ConversionError::WarmUpFailed {
                    reason: reason.clone(),
                }),
                None => Ok(()),
            }
        }
    }

    /// Router over a scratch work dir. `engine` replaces `soffice`.
    pub fn test_state(
        probe: Arc<CountingProbe>,
        engine: Option<PathBuf>,
    ) -> (axum::Router, Arc<AppState>, tempfile::TempDir) {
        test_state_with(probe, |cfg| {
            if let Some(engine) = engine {
                cfg.soffice = engine.into();
            }
        })
    }

    pub fn test_state_with(
        probe: Arc<CountingProbe>,
        configure: impl FnOnce(&mut Config),
    ) -> (axum::Router, Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("work dir");
        let mut cfg = Config {
            work_dir: dir.path().to_path_buf(),
            warm_wait: Duration::from_secs(2),
            ..Config::default()
        };
        configure(&mut cfg);

        let runtime = Runtime::with_probe(cfg.runtime_config(), probe);
        let state = Arc::new(AppState::new(cfg, runtime));
        (super::build(Arc::clone(&state)), state, dir)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::test_support::{CountingProbe, test_state};

    #[tokio::test]
    async fn unknown_path_is_json_404_with_trace_id() {
        let (app, _state, _dir) = test_state(CountingProbe::new(Duration::ZERO, None), None);

        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-trace-id"));
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn incoming_trace_id_is_echoed() {
        let (app, _state, _dir) = test_state(CountingProbe::new(Duration::ZERO, None), None);
        let id = "6f1c2f5e-8a55-4b7e-9d8c-3f1f0e4f2a11";

        let response = app
            .oneshot(
                Request::get("/healthz")
                    .header("x-trace-id", id)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(
            response.headers().get("x-trace-id").and_then(|v| v.to_str().ok()),
            Some(id)
        );
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let (app, _state, _dir) = test_state(CountingProbe::new(Duration::ZERO, None), None);

        let response = app
            .oneshot(
                Request::get("/api-docs/openapi.json")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert!(doc["paths"]["/healthz"].is_object());
        assert!(doc["paths"]["/convert/{route}"].is_object());
    }
}
