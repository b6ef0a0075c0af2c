//! Server configuration, loaded from environment variables at startup.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use docconv_core::api::{self, EngineConfig, PdfToDocxEngine};

/// Runtime configuration for docconv-server.
///
/// Every field has a default so the server starts without any environment
/// variables set, provided `soffice` is on `PATH`.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:$PORT"`, else `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for daily-rolling log files; stdout only when unset.
    pub log_dir: Option<PathBuf>,

    /// Root for per-request upload/output directories.
    pub work_dir: PathBuf,

    /// Upload size limit in bytes.
    pub max_upload_bytes: u64,

    pub soffice: OsString,
    pub soffice_profile: Option<PathBuf>,
    pub pdf_to_docx_engine: PdfToDocxEngine,
    pub python: OsString,
    pub pdf2docx_script: PathBuf,

    pub convert_timeout: Duration,
    pub warm_wait: Duration,
    pub warm_probe_timeout: Duration,
    pub warm_on_start: bool,
    pub max_concurrent_jobs: usize,

    /// Comma-separated CORS allow-list; any origin when unset.
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let default_bind = match std::env::var("PORT") {
            Ok(port) if !port.trim().is_empty() => format!("0.0.0.0:{}", port.trim()),
            _ => "0.0.0.0:3000".to_owned(),
        };

        Self {
            bind_address: env_or("DOCCONV_BIND", &default_bind),
            log_level: env_or("DOCCONV_LOG", "info"),
            log_json: parse_bool("DOCCONV_LOG_JSON", false),
            log_dir: env_opt("DOCCONV_LOG_DIR").map(PathBuf::from),
            work_dir: env_opt("DOCCONV_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("docconv")),
            max_upload_bytes: mib_to_bytes(parse_env("DOCCONV_MAX_UPLOAD_MB", 25u64)),
            soffice: env_or("DOCCONV_SOFFICE", "soffice").into(),
            soffice_profile: env_opt("DOCCONV_SOFFICE_PROFILE").map(PathBuf::from),
            pdf_to_docx_engine: parse_env("DOCCONV_PDF_TO_DOCX_ENGINE", PdfToDocxEngine::Soffice),
            python: env_or("DOCCONV_PYTHON", "python3").into(),
            pdf2docx_script: env_or("DOCCONV_PDF2DOCX_SCRIPT", "scripts/convert_pdf_to_docx.py")
                .into(),
            convert_timeout: Duration::from_secs(parse_env("DOCCONV_CONVERT_TIMEOUT_SECS", 120)),
            warm_wait: Duration::from_secs(parse_env("DOCCONV_WARM_WAIT_SECS", 20)),
            warm_probe_timeout: Duration::from_secs(parse_env(
                "DOCCONV_WARM_PROBE_TIMEOUT_SECS",
                90,
            )),
            warm_on_start: parse_bool("DOCCONV_WARM_ON_START", true),
            max_concurrent_jobs: parse_env(
                "DOCCONV_MAX_CONCURRENT_JOBS",
                api::DEFAULT_MAX_CONCURRENT_JOBS,
            ),
            cors_allowed_origins: env_opt("DOCCONV_CORS_ORIGINS"),
        }
    }

    /// Configuration for the conversion core.
    pub fn runtime_config(&self) -> api::Config {
        api::Config {
            engine: EngineConfig {
                soffice: self.soffice.clone(),
                profile_dir: self.soffice_profile.clone(),
                pdf_to_docx: self.pdf_to_docx_engine,
                python: self.python.clone(),
                pdf2docx_script: self.pdf2docx_script.clone(),
            },
            work_dir: self.work_dir.clone(),
            conversion_timeout: self.convert_timeout,
            warm_probe_timeout: self.warm_probe_timeout,
            warm_wait: self.warm_wait,
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }

    /// Upload limit in whole MiB, for error messages.
    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_bytes / (1024 * 1024)
    }
}

impl Default for Config {
    fn default() -> Self {
        let core = api::Config::default();
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            log_dir: None,
            work_dir: core.work_dir,
            max_upload_bytes: 25 * 1024 * 1024,
            soffice: core.engine.soffice,
            soffice_profile: core.engine.profile_dir,
            pdf_to_docx_engine: core.engine.pdf_to_docx,
            python: core.engine.python,
            pdf2docx_script: core.engine.pdf2docx_script,
            convert_timeout: core.conversion_timeout,
            warm_wait: core.warm_wait,
            warm_probe_timeout: core.warm_probe_timeout,
            warm_on_start: true,
            max_concurrent_jobs: core.max_concurrent_jobs,
            cors_allowed_origins: None,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Saturates instead of overflowing on absurd limits.
fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(1024 * 1024)
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
