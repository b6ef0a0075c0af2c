//! Public-facing API facade for docconv-core.
//!
//! A [`Runtime`] bundles the pieces one server needs: the job runner, the
//! engine warm coordinator, the upload store and the concurrency limiter.
//! It is an ordinary value: build it once at startup and share it.
//!
//! # Quick-start
//!
//! ```rust,no_run
//! use docconv_core::api::{self, ConversionRequest, ConversionRoute, UploadedFile};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), docconv_core::ConversionError> {
//! let runtime = api::Runtime::new(api::Config::default());
//! runtime.store().prepare().await?;
//!
//! // Reserve a unique location and put the upload there.
//! let artifacts = runtime.store().allocate("report.pptx").await?;
//! tokio::fs::write(artifacts.input_path(), b"...").await.ok();
//!
//! let upload = UploadedFile {
//!     original_name: "report.pptx".into(),
//!     mime_type: "application/octet-stream".into(),
//!     size_bytes: 3,
//!     path: artifacts.input_path().to_path_buf(),
//! };
//! let request = ConversionRequest::for_route(ConversionRoute::PptxToPdf, Some(upload));
//! let output = runtime.convert(&request, artifacts.output_dir()).await?;
//! println!("converted to {}", output.path.display());
//!
//! // Removes the input and the output.
//! artifacts.release();
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub use crate::runtime::admission::{ConversionLimiter, Permit};
pub use crate::runtime::command::{EngineCommand, EngineConfig, PdfToDocxEngine, import_filter};
pub use crate::runtime::runner::{
    ConversionJob, DEFAULT_CONVERSION_TIMEOUT, JobRunner, OutputFile, locate_output,
};
pub use crate::runtime::storage::{
    ArtifactStream, JobArtifacts, UploadStore, sanitize_file_name, stream_output,
};
pub use crate::runtime::types::{
    ConversionError, ConversionRequest, ConversionRoute, JobState, SourceKind, TargetFormat,
    UploadedFile, WarmOutcome, WarmPhase, WarmStatus, download_name, validate_filter_hint,
};
pub use crate::runtime::warm::{
    CommandProbe, DEFAULT_WARM_WAIT, EngineProbe, WarmCoordinator, WarmHandle,
};

/// Upper bound for the warm-up probe process itself.
pub const DEFAULT_WARM_PROBE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default number of engine processes allowed at once.
///
/// The office engine locks its user profile, and every process shares the
/// same one unless each is given its own, so conversions run one at a time
/// unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;

/// Runtime configuration for the conversion core.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    /// Root for per-job upload/output directories.
    pub work_dir: PathBuf,
    /// Hard limit on one conversion process.
    pub conversion_timeout: Duration,
    /// Hard limit on the warm-up probe process.
    pub warm_probe_timeout: Duration,
    /// How long a conversion waits on an in-flight warm-up before going ahead.
    pub warm_wait: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            work_dir: std::env::temp_dir().join("docconv"),
            conversion_timeout: DEFAULT_CONVERSION_TIMEOUT,
            warm_probe_timeout: DEFAULT_WARM_PROBE_TIMEOUT,
            warm_wait: DEFAULT_WARM_WAIT,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// The conversion core, wired together.
#[derive(Debug, Clone)]
pub struct Runtime {
    runner: JobRunner,
    warm: Arc<WarmCoordinator>,
    store: UploadStore,
    limiter: ConversionLimiter,
    warm_wait: Duration,
}

impl Runtime {
    /// Build a runtime whose warm-up probe runs the configured engine.
    pub fn new(config: Config) -> Self {
        let probe = CommandProbe::new(config.engine.probe_command(), config.warm_probe_timeout);
        Self::with_probe(config, Arc::new(probe))
    }

    /// Build a runtime with a custom warm-up probe.
    pub fn with_probe(config: Config, probe: Arc<dyn EngineProbe>) -> Self {
        Self {
            runner: JobRunner::new(Arc::new(config.engine), config.conversion_timeout),
            warm: Arc::new(WarmCoordinator::new(probe)),
            store: UploadStore::new(config.work_dir),
            limiter: ConversionLimiter::new(config.max_concurrent_jobs),
            warm_wait: config.warm_wait,
        }
    }

    pub fn warm(&self) -> &WarmCoordinator {
        &self.warm
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    pub fn limiter(&self) -> &ConversionLimiter {
        &self.limiter
    }

    pub fn warm_wait(&self) -> Duration {
        self.warm_wait
    }

    /// Convert one upload, writing the result into `output_dir`.
    ///
    /// Waits at most the configured warm-wait for the engine to be warm and
    /// then converts regardless of the warm outcome. A request without an
    /// upload, or with an invalid filter hint, fails before any warm-up or
    /// process is started.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        output_dir: &Path,
    ) -> Result<OutputFile, ConversionError> {
        // Rejects a missing upload or a bad filter hint up front.
        self.runner.prepare(request, output_dir)?;

        match self.warm.ensure_warm_within(self.warm_wait).await {
            Some(WarmOutcome::Warmed) => {}
            Some(WarmOutcome::Failed { reason }) => {
                warn!(reason = %reason, "engine warm-up failed; converting anyway");
            }
            None => info!(
                wait_secs = self.warm_wait.as_secs(),
                "engine still warming; converting without waiting further"
            ),
        }

        let _permit = self.limiter.acquire().await?;
        self.runner.convert(request, output_dir).await
    }
}
