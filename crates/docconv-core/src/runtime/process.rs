//! Single external-process execution with a hard wall-clock limit.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::runtime::command::EngineCommand;
use crate::runtime::types::ConversionError;

/// Lines of stdout/stderr retained for diagnostics.
const TAIL_LINES: usize = 20;

/// How long to wait for the output pipes to close after the process exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// How a process run ended. A timeout is never folded into a non-zero exit.
#[derive(Debug)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    TimedOut { after: Duration },
}

/// Spawn `command`, wait at most `limit`, and kill it (and its process group
/// on unix) if the limit is reached.
///
/// Only a failure to start the process is returned as an error. Dropping the
/// returned future kills the process group as well.
pub async fn run(
    command: &EngineCommand,
    limit: Duration,
    label: &str,
) -> Result<ProcessOutcome, ConversionError> {
    let mut cmd = command.to_tokio();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| ConversionError::ConversionProcessFailed {
        reason: format!(
            "failed to start '{}': {e}",
            command.program().to_string_lossy()
        ),
    })?;

    debug!(label, pid = child.id(), command = %command, "process spawned");

    // Declared after `child` so it runs first if this future is dropped.
    let mut group = GroupKillGuard {
        pgid: child.id(),
        label: label.to_owned(),
    };

    let stdout_task = tokio::spawn(drain(child.stdout.take(), label.to_owned(), "stdout"));
    let stderr_task = tokio::spawn(drain(child.stderr.take(), label.to_owned(), "stderr"));

    match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => {
            group.disarm();
            let stdout_tail = collect_tail(stdout_task).await;
            let stderr_tail = collect_tail(stderr_task).await;
            Ok(ProcessOutcome::Exited(ProcessOutput {
                status,
                stdout_tail,
                stderr_tail,
            }))
        }
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            terminate(&mut child, label).await;
            group.disarm();
            Err(ConversionError::io(format!("waiting for {label}"), e))
        }
        Err(_) => {
            warn!(label, limit_secs = limit.as_secs(), "process exceeded its time limit; killing");
            terminate(&mut child, label).await;
            group.disarm();
            stdout_task.abort();
            stderr_task.abort();
            Ok(ProcessOutcome::TimedOut { after: limit })
        }
    }
}

/// Kills the child's process group when a run is abandoned before the child
/// was reaped. `kill_on_drop` alone only reaches the direct child, not the
/// helpers it forked.
struct GroupKillGuard {
    pgid: Option<u32>,
    label: String,
}

impl GroupKillGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            warn!(label = %self.label, pgid, "process run abandoned; killing its process group");
            kill_group(pgid, &self.label);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32, label: &str) {
    // The child leads its own group; a negative pid reaches helpers it forked.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        debug!(label, pgid, error = %std::io::Error::last_os_error(), "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32, _label: &str) {}

/// Wait briefly for a drain task; abort it if the pipe stays open.
async fn collect_tail(mut task: JoinHandle<String>) -> String {
    match timeout(DRAIN_GRACE, &mut task).await {
        Ok(tail) => tail.unwrap_or_default(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// Kill the child and reap it so no zombie is left behind.
async fn terminate(child: &mut Child, label: &str) {
    if let Some(pid) = child.id() {
        kill_group(pid, label);
    }

    if let Err(e) = child.kill().await {
        warn!(label, error = %e, "failed to kill process");
    }
}

/// Log every line of `reader` and keep the last few.
async fn drain<R>(reader: Option<R>, label: String, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Engines print in the host locale; never stop reading over it.
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                debug!(label = %label, stream, "{line}");
                if tail.len() == TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_owned());
            }
            Err(e) => {
                debug!(label = %label, stream, error = %e, "stopped reading process output");
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}
