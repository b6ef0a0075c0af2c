//! Upload/output lifecycle.
//!
//! Every request gets its own directory under the store root:
//!
//! ```text
//! <root>/job-<unix millis>-<uuid>/in/<sanitized upload name>
//! <root>/job-<unix millis>-<uuid>/out/
//! ```
//!
//! The directory is owned by a [`JobArtifacts`] guard and removed exactly
//! once: on [`JobArtifacts::release`], or on drop when the guard is lost on
//! an error path or inside an aborted response stream.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::runtime::runner::OutputFile;
use crate::runtime::types::ConversionError;

/// Prefix of every per-job directory; used by the startup sweep.
pub const JOB_DIR_PREFIX: &str = "job-";

const INPUT_DIR_NAME: &str = "in";
const OUTPUT_DIR_NAME: &str = "out";

/// Allocates unique per-request locations under one root directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and remove job directories left by a previous run.
    ///
    /// Returns the number of stale directories removed.
    pub async fn prepare(&self) -> Result<usize, ConversionError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ConversionError::io("creating work directory", e))?;

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| ConversionError::io("reading work directory", e))?;

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_job_dir = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(JOB_DIR_PREFIX));
            if !is_job_dir {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "failed to remove stale job directory"
                ),
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root.display(), "removed stale job directories");
        }
        Ok(removed)
    }

    /// Reserve a unique input path (and output directory) for `original_name`.
    pub async fn allocate(&self, original_name: &str) -> Result<JobArtifacts, ConversionError> {
        let id = Uuid::new_v4();
        let millis = chrono::Utc::now().timestamp_millis();
        let job_dir = self
            .root
            .join(format!("{JOB_DIR_PREFIX}{millis}-{}", id.simple()));
        let input_dir = job_dir.join(INPUT_DIR_NAME);
        let artifacts = JobArtifacts {
            id,
            input_path: input_dir.join(sanitize_file_name(original_name)),
            output_dir: job_dir.join(OUTPUT_DIR_NAME),
            job_dir,
            released: false,
        };

        // A failure here drops `artifacts`, which removes whatever was created.
        for dir in [input_dir.as_path(), artifacts.output_dir()] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ConversionError::io("creating job directory", e))?;
        }

        debug!(job_dir = %artifacts.job_dir.display(), "allocated job directory");
        Ok(artifacts)
    }
}

/// On-disk artifacts of one request. Removed exactly once.
#[derive(Debug)]
pub struct JobArtifacts {
    id: Uuid,
    job_dir: PathBuf,
    input_path: PathBuf,
    output_dir: PathBuf,
    released: bool,
}

impl JobArtifacts {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Delete the input, the outputs, and the job directory.
    ///
    /// Failures are logged and returned for inspection; they are never meant
    /// to fail the request.
    pub fn release(mut self) -> Vec<ConversionError> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Vec<ConversionError> {
        if self.released {
            return Vec::new();
        }
        self.released = true;

        let mut failures = Vec::new();
        let steps: [(&Path, fn(&Path) -> std::io::Result<()>); 3] = [
            (self.input_path.as_path(), |p| std::fs::remove_file(p)),
            (self.output_dir.as_path(), |p| std::fs::remove_dir_all(p)),
            (self.job_dir.as_path(), |p| std::fs::remove_dir_all(p)),
        ];
        for (path, remove) in steps {
            match remove(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cleanup failed");
                    failures.push(ConversionError::CleanupFailed {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(job_dir = %self.job_dir.display(), "released job artifacts");
        failures
    }
}

impl Drop for JobArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Body stream that owns the job artifacts and releases them when the
/// stream ends or is dropped mid-download.
pub struct ArtifactStream<S> {
    inner: S,
    artifacts: Option<JobArtifacts>,
}

impl<S> ArtifactStream<S> {
    pub fn new(inner: S, artifacts: JobArtifacts) -> Self {
        Self {
            inner,
            artifacts: Some(artifacts),
        }
    }
}

impl<S> Stream for ArtifactStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            if let Some(artifacts) = self.artifacts.take() {
                artifacts.release();
            }
        }
        polled
    }
}

/// Open `output` as a byte stream that cleans up `artifacts` when done.
pub async fn stream_output(
    output: &OutputFile,
    artifacts: JobArtifacts,
) -> Result<ArtifactStream<ReaderStream<tokio::fs::File>>, ConversionError> {
    let file = tokio::fs::File::open(&output.path)
        .await
        .map_err(|e| ConversionError::io("opening converted file", e))?;
    Ok(ArtifactStream::new(ReaderStream::new(file), artifacts))
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_`. Never empty, never a
/// dot-only name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        "upload".to_owned()
    } else {
        cleaned
    }
}
