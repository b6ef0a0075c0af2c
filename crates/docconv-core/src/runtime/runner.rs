//! Conversion job runner.
//!
//! Turns a [`ConversionRequest`] into exactly one engine invocation, bounded
//! by a hard timeout, and resolves the file the engine produced. The runner
//! never deletes anything; artifact cleanup belongs to
//! [`JobArtifacts`](crate::runtime::storage::JobArtifacts).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::runtime::command::{EngineCommand, EngineConfig, expected_output_path};
use crate::runtime::process::{self, ProcessOutcome};
use crate::runtime::types::{
    ConversionError, ConversionRequest, JobState, TargetFormat, validate_filter_hint,
};

/// Hard wall-clock limit for one conversion.
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(120);

/// One engine invocation and its progress.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub target: TargetFormat,
    pub command: EngineCommand,
    pub deadline: Instant,
    pub state: JobState,
}

/// A converted file, ready to be streamed back.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub format: TargetFormat,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    engine: Arc<EngineConfig>,
    timeout: Duration,
}

impl JobRunner {
    pub fn new(engine: Arc<EngineConfig>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Validate the request and resolve the command, without spawning anything.
    pub fn prepare(
        &self,
        request: &ConversionRequest,
        output_dir: &Path,
    ) -> Result<ConversionJob, ConversionError> {
        let upload = request
            .upload
            .as_ref()
            .ok_or(ConversionError::NoFileProvided)?;

        if let Some(hint) = request.filter_hint.as_deref() {
            validate_filter_hint(hint)?;
        }

        let command = self.engine.conversion_command(
            request.source_kind(),
            request.target,
            request.filter_hint.as_deref(),
            &upload.path,
            output_dir,
        );

        Ok(ConversionJob {
            id: Uuid::new_v4(),
            input: upload.path.clone(),
            output_dir: output_dir.to_path_buf(),
            target: request.target,
            command,
            deadline: Instant::now() + self.timeout,
            state: JobState::Running,
        })
    }

    /// Run one conversion to completion.
    ///
    /// Fails fast with [`ConversionError::NoFileProvided`] when the request
    /// has no upload or the upload is missing from disk; no process is
    /// spawned in that case.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        output_dir: &Path,
    ) -> Result<OutputFile, ConversionError> {
        let mut job = self.prepare(request, output_dir)?;

        if !tokio::fs::try_exists(&job.input).await.unwrap_or(false) {
            return Err(ConversionError::NoFileProvided);
        }

        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(|e| ConversionError::io("creating output directory", e))?;

        let original_name = request
            .upload
            .as_ref()
            .map(|u| u.original_name.as_str())
            .unwrap_or_default();
        info!(
            job_id = %job.id,
            original_name,
            target = %job.target,
            "[job start]"
        );

        let result = self.execute(&mut job).await;
        match &result {
            Ok(output) => info!(
                job_id = %job.id,
                output = %output.path.display(),
                size_bytes = output.size_bytes,
                "[job complete]"
            ),
            Err(e) => warn!(job_id = %job.id, error = %e, code = e.code(), "[job failed]"),
        }
        result
    }

    async fn execute(&self, job: &mut ConversionJob) -> Result<OutputFile, ConversionError> {
        let limit = job.deadline.saturating_duration_since(Instant::now());
        let label = format!("job-{}", job.id);

        let outcome = match process::run(&job.command, limit, &label).await {
            Ok(outcome) => outcome,
            Err(e) => {
                job.state = JobState::Failed {
                    reason: e.to_string(),
                };
                error!(job_id = %job.id, command = %job.command, error = %e, "engine did not start");
                return Err(e);
            }
        };

        match outcome {
            ProcessOutcome::TimedOut { after } => {
                job.state = JobState::TimedOut;
                Err(ConversionError::ConversionTimedOut { after })
            }
            ProcessOutcome::Exited(output) if !output.status.success() => {
                error!(
                    job_id = %job.id,
                    status = %output.status,
                    stderr = %output.stderr_tail,
                    stdout = %output.stdout_tail,
                    "engine exited with failure"
                );
                let reason = match output.status.code() {
                    Some(code) => format!("engine exited with code {code}"),
                    None => "engine terminated by signal".to_owned(),
                };
                job.state = JobState::Failed {
                    reason: reason.clone(),
                };
                Err(ConversionError::ConversionProcessFailed { reason })
            }
            ProcessOutcome::Exited(output) => {
                let Some(path) = locate_output(&job.output_dir, &job.input, job.target).await
                else {
                    error!(
                        job_id = %job.id,
                        stderr = %output.stderr_tail,
                        "engine exited cleanly but no output file was found"
                    );
                    job.state = JobState::Failed {
                        reason: "output missing".to_owned(),
                    };
                    return Err(ConversionError::OutputArtifactMissing {
                        extension: job.target.extension().to_owned(),
                    });
                };

                let size_bytes = tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.len())
                    .map_err(|e| ConversionError::io("reading output metadata", e))?;

                job.state = JobState::Succeeded;
                Ok(OutputFile {
                    path,
                    format: job.target,
                    size_bytes,
                })
            }
        }
    }
}

/// Find the engine's output for `input`.
///
/// Tries `<stem>.<ext>` first, then falls back to the most recently modified
/// `*.<ext>` file in `output_dir` (the engine rewrites some names).
pub async fn locate_output(output_dir: &Path, input: &Path, target: TargetFormat) -> Option<PathBuf> {
    let expected = expected_output_path(output_dir, input, target);
    if is_file(&expected).await {
        return Some(expected);
    }
    newest_with_extension(output_dir, target.extension()).await
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn newest_with_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }

        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);

        if newest.as_ref().is_none_or(|(best, _)| modified >= *best) {
            newest = Some((modified, path));
        }
    }

    newest.map(|(_, path)| path)
}
