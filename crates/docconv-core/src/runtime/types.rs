use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumString};
use thiserror::Error;

pub const PDF_MIME: &str = "application/pdf";
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Formats the engine can be asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Pdf,
    Pptx,
    Docx,
}

impl TargetFormat {
    /// File extension (without the dot) the engine writes for this format.
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Pdf => "pdf",
            TargetFormat::Pptx => "pptx",
            TargetFormat::Docx => "docx",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            TargetFormat::Pdf => PDF_MIME,
            TargetFormat::Pptx => PPTX_MIME,
            TargetFormat::Docx => DOCX_MIME,
        }
    }
}

/// Coarse classification of an uploaded document.
///
/// Only used to pick an import filter; the engine does its own format
/// detection for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Pptx,
    Docx,
    Other,
}

impl SourceKind {
    /// Classify by negotiated mime type first, then by the file extension.
    pub fn detect(mime_type: &str, file_name: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            PDF_MIME => return SourceKind::Pdf,
            PPTX_MIME => return SourceKind::Pptx,
            DOCX_MIME => return SourceKind::Docx,
            _ => {}
        }

        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => SourceKind::Pdf,
            Some("pptx") => SourceKind::Pptx,
            Some("docx") => SourceKind::Docx,
            _ => SourceKind::Other,
        }
    }
}

/// The fixed set of conversions exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ConversionRoute {
    #[strum(serialize = "pptx-to-pdf")]
    PptxToPdf,
    #[strum(serialize = "pdf-to-pptx")]
    PdfToPptx,
    #[strum(serialize = "docx-to-pdf")]
    DocxToPdf,
    #[strum(serialize = "pdf-to-docx")]
    PdfToDocx,
}

impl ConversionRoute {
    pub const ALL: [ConversionRoute; 4] = [
        ConversionRoute::PptxToPdf,
        ConversionRoute::PdfToPptx,
        ConversionRoute::DocxToPdf,
        ConversionRoute::PdfToDocx,
    ];

    /// Source kind the route is declared for.
    pub fn source(self) -> SourceKind {
        match self {
            ConversionRoute::PptxToPdf => SourceKind::Pptx,
            ConversionRoute::DocxToPdf => SourceKind::Docx,
            ConversionRoute::PdfToPptx | ConversionRoute::PdfToDocx => SourceKind::Pdf,
        }
    }

    pub fn target(self) -> TargetFormat {
        match self {
            ConversionRoute::PptxToPdf | ConversionRoute::DocxToPdf => TargetFormat::Pdf,
            ConversionRoute::PdfToPptx => TargetFormat::Pptx,
            ConversionRoute::PdfToDocx => TargetFormat::Docx,
        }
    }
}

/// An upload that has already been written to its allocated path.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Name as sent by the client (unsanitized; never used as a path).
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

/// One conversion call. Lives for a single HTTP request.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub upload: Option<UploadedFile>,
    pub target: TargetFormat,
    /// Explicit engine import filter, overriding the built-in table.
    pub filter_hint: Option<String>,
    /// Source kind implied by the route, used when the upload is unlabeled.
    pub declared_source: Option<SourceKind>,
}

impl ConversionRequest {
    pub fn new(upload: Option<UploadedFile>, target: TargetFormat) -> Self {
        Self {
            upload,
            target,
            filter_hint: None,
            declared_source: None,
        }
    }

    /// Build a request for one of the HTTP routes.
    pub fn for_route(route: ConversionRoute, upload: Option<UploadedFile>) -> Self {
        Self {
            upload,
            target: route.target(),
            filter_hint: None,
            declared_source: Some(route.source()),
        }
    }

    pub fn with_filter_hint(mut self, hint: Option<String>) -> Self {
        self.filter_hint = hint;
        self
    }

    pub fn source_kind(&self) -> SourceKind {
        let detected = self
            .upload
            .as_ref()
            .map(|u| SourceKind::detect(&u.mime_type, &u.original_name))
            .unwrap_or(SourceKind::Other);

        match (detected, self.declared_source) {
            (SourceKind::Other, Some(declared)) => declared,
            (detected, _) => detected,
        }
    }

    /// Name offered to the client for the converted file.
    pub fn download_name(&self) -> Option<String> {
        self.upload
            .as_ref()
            .map(|u| download_name(&u.original_name, self.target))
    }
}

/// `report.final.pptx` → `report.final.pdf`; path components and characters
/// unsafe in a `Content-Disposition` header are dropped.
pub fn download_name(original_name: &str, target: TargetFormat) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);

    let stem = match base.rfind('.') {
        Some(idx)
            if idx > 0
                && idx + 1 < base.len()
                && base[idx + 1..]
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_') =>
        {
            &base[..idx]
        }
        _ => base,
    };

    let cleaned: String = stem
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    let cleaned = cleaned.trim();

    let stem = if cleaned.is_empty() { "converted" } else { cleaned };
    format!("{stem}.{}", target.extension())
}

/// Reject filter hints the engine could misread as extra options.
pub fn validate_filter_hint(hint: &str) -> Result<(), ConversionError> {
    let valid = !hint.is_empty()
        && hint.len() <= 128
        && !hint.starts_with('-')
        && hint
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | ':' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ConversionError::InvalidFilterHint {
            hint: hint.chars().take(64).collect(),
        })
    }
}

/// Lifecycle of a single [`ConversionJob`](crate::runtime::runner::ConversionJob).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed { reason: String },
    TimedOut,
}

/// Readiness phase of the conversion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WarmPhase {
    #[default]
    Cold,
    Warming,
    Warmed,
}

/// Non-blocking snapshot of the warm state, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct WarmStatus {
    pub phase: WarmPhase,
    pub last_warm_start: Option<DateTime<Utc>>,
    pub last_warm_end: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of one warm operation, shared by every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmOutcome {
    Warmed,
    Failed { reason: String },
}

impl WarmOutcome {
    pub fn phase(&self) -> WarmPhase {
        match self {
            WarmOutcome::Warmed => WarmPhase::Warmed,
            WarmOutcome::Failed { .. } => WarmPhase::Cold,
        }
    }
}

/// Errors produced by the conversion core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The request carried no file, or the file is gone from disk.
    #[error("no file provided")]
    NoFileProvided,

    /// The upload exceeded the configured size limit.
    #[error("upload exceeds the {limit_bytes} byte limit")]
    PayloadTooLarge { limit_bytes: u64 },

    /// The caller's filter hint contains characters the engine must not see.
    #[error("invalid filter hint '{hint}'")]
    InvalidFilterHint { hint: String },

    /// The engine could not be started or exited non-zero.
    #[error("conversion process failed: {reason}")]
    ConversionProcessFailed { reason: String },

    /// The engine ran past its deadline and was killed.
    #[error("conversion timed out after {}s", .after.as_secs())]
    ConversionTimedOut { after: Duration },

    /// The engine exited cleanly but left no output behind.
    #[error("engine exited cleanly but produced no .{extension} file")]
    OutputArtifactMissing { extension: String },

    /// The warm-up probe failed. Conversions still proceed.
    #[error("engine warm-up failed: {reason}")]
    WarmUpFailed { reason: String },

    /// A temp artifact could not be removed. Logged only.
    #[error("failed to remove {}: {reason}", .path.display())]
    CleanupFailed { path: PathBuf, reason: String },

    #[error("{context}: {message}")]
    Io { context: String, message: String },
}

impl ConversionError {
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        ConversionError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Stable, machine-readable class name.
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::NoFileProvided => "no_file_provided",
            ConversionError::PayloadTooLarge { .. } => "payload_too_large",
            ConversionError::InvalidFilterHint { .. } => "invalid_filter_hint",
            ConversionError::ConversionProcessFailed { .. } => "conversion_process_failed",
            ConversionError::ConversionTimedOut { .. } => "conversion_timed_out",
            ConversionError::OutputArtifactMissing { .. } => "output_artifact_missing",
            ConversionError::WarmUpFailed { .. } => "warm_up_failed",
            ConversionError::CleanupFailed { .. } => "cleanup_failed",
            ConversionError::Io { .. } => "io_error",
        }
    }
}
