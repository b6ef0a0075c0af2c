//! Engine warm-start coordination.
//!
//! The office engine pays a large one-off initialization cost. The
//! coordinator runs a cheap probe invocation once, in the background, and
//! lets every concurrent caller await that same single operation.
//!
//! Phases: `Cold → Warming → Warmed`, or `Warming → Cold` when the probe
//! fails (a later call may retry). `Warmed` is kept for the lifetime of the
//! process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{info, warn};

use crate::runtime::command::EngineCommand;
use crate::runtime::process::{self, ProcessOutcome};
use crate::runtime::types::{ConversionError, WarmOutcome, WarmPhase, WarmStatus};

/// Ceiling on how long a conversion waits for an in-flight warm-up.
pub const DEFAULT_WARM_WAIT: Duration = Duration::from_secs(20);

/// Handle to the single in-flight warm operation. Cloning joins it.
pub type WarmHandle = Shared<BoxFuture<'static, WarmOutcome>>;

/// Something that forces the engine through its cold start.
#[async_trait]
pub trait EngineProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ConversionError>;
}

/// Probe that runs the engine headless with a trivial command.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: EngineCommand,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(command: EngineCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl EngineProbe for CommandProbe {
    async fn probe(&self) -> Result<(), ConversionError> {
        let outcome = process::run(&self.command, self.timeout, "warm-probe")
            .await
            .map_err(|e| ConversionError::WarmUpFailed {
                reason: e.to_string(),
            })?;

        match outcome {
            ProcessOutcome::Exited(output) if output.status.success() => {
                info!(version = %output.stdout_tail.trim(), "engine probe succeeded");
                Ok(())
            }
            ProcessOutcome::Exited(output) => {
                warn!(status = %output.status, stderr = %output.stderr_tail, "engine probe failed");
                Err(ConversionError::WarmUpFailed {
                    reason: format!("probe exited with {}", output.status),
                })
            }
            ProcessOutcome::TimedOut { after } => Err(ConversionError::WarmUpFailed {
                reason: format!("probe timed out after {}s", after.as_secs()),
            }),
        }
    }
}

#[derive(Default)]
struct WarmState {
    phase: WarmPhase,
    last_warm_start: Option<DateTime<Utc>>,
    last_warm_end: Option<DateTime<Utc>>,
    last_error: Option<String>,
    in_flight: Option<WarmHandle>,
}

impl WarmState {
    /// Record the end of the current warm operation.
    fn finish(&mut self, outcome: &WarmOutcome) {
        self.last_warm_end = Some(Utc::now());
        self.in_flight = None;
        match outcome {
            WarmOutcome::Warmed => {
                self.phase = WarmPhase::Warmed;
                self.last_error = None;
            }
            WarmOutcome::Failed { reason } => {
                self.phase = WarmPhase::Cold;
                self.last_error = Some(reason.clone());
            }
        }
    }
}

/// Owner of the engine warm state. One per server, shared behind an `Arc`.
pub struct WarmCoordinator {
    probe: Arc<dyn EngineProbe>,
    state: Arc<Mutex<WarmState>>,
}

impl std::fmt::Debug for WarmCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WarmCoordinator({})", self.status().phase)
    }
}

impl WarmCoordinator {
    pub fn new(probe: Arc<dyn EngineProbe>) -> Self {
        Self {
            probe,
            state: Arc::new(Mutex::new(WarmState::default())),
        }
    }

    /// Start a warm-up, or join the one already running.
    ///
    /// The probe runs on its own task: dropping the returned handle does not
    /// cancel it. Must be called from within a tokio runtime.
    pub fn trigger(&self) -> WarmHandle {
        let mut state = lock(&self.state);

        match state.phase {
            WarmPhase::Warmed => return future::ready(WarmOutcome::Warmed).boxed().shared(),
            WarmPhase::Warming => {
                if let Some(handle) = &state.in_flight {
                    return handle.clone();
                }
            }
            WarmPhase::Cold => {}
        }

        state.phase = WarmPhase::Warming;
        state.last_warm_start = Some(Utc::now());
        info!("engine warm-up started");

        let probe = Arc::clone(&self.probe);
        let task_state = Arc::clone(&self.state);
        // The task needs the lock to publish its result, so it cannot finish
        // before `in_flight` is set below.
        let join = tokio::spawn(async move {
            let outcome = match probe.probe().await {
                Ok(()) => WarmOutcome::Warmed,
                Err(e) => WarmOutcome::Failed {
                    reason: match e {
                        ConversionError::WarmUpFailed { reason } => reason,
                        other => other.to_string(),
                    },
                },
            };
            match &outcome {
                WarmOutcome::Warmed => info!("engine warmed"),
                WarmOutcome::Failed { reason } => warn!(reason = %reason, "engine warm-up failed"),
            }
            lock(&task_state).finish(&outcome);
            outcome
        });

        let failed_state = Arc::clone(&self.state);
        let handle = async move {
            match join.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = WarmOutcome::Failed {
                        reason: format!("warm-up task aborted: {e}"),
                    };
                    let mut state = lock(&failed_state);
                    if state.phase == WarmPhase::Warming {
                        state.finish(&outcome);
                    }
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(handle.clone());
        handle
    }

    /// Wait for the engine to be warm, starting a warm-up if needed.
    pub async fn ensure_warm(&self) -> WarmOutcome {
        self.trigger().await
    }

    /// Like [`Self::ensure_warm`] but gives up waiting after `ceiling`.
    ///
    /// `None` means the warm-up is still running; it keeps going in the
    /// background.
    pub async fn ensure_warm_within(&self, ceiling: Duration) -> Option<WarmOutcome> {
        tokio::time::timeout(ceiling, self.trigger()).await.ok()
    }

    /// Snapshot for health reporting. Never blocks on a warm-up.
    pub fn status(&self) -> WarmStatus {
        let state = lock(&self.state);
        WarmStatus {
            phase: state.phase,
            last_warm_start: state.last_warm_start,
            last_warm_end: state.last_warm_end,
            last_error: state.last_error.clone(),
        }
    }
}

fn lock(state: &Mutex<WarmState>) -> MutexGuard<'_, WarmState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
