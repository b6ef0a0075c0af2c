//! Shared application state injected into every Axum handler.

use std::sync::Arc;
use std::time::Instant;

use docconv_core::api::Runtime;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Job runner, warm coordinator, upload store and limiter.
    pub runtime: Runtime,
    /// Process start, for the uptime reported by `/healthz`.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, runtime: Runtime) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            started_at: Instant::now(),
        }
    }
}
