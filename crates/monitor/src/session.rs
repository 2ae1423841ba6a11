//! Per-operation supervision state
//!
//! A [`RecoverySession`] bundles everything one supervised recovery needs:
//! the target handle, the begin marker captured before the trigger, the
//! polling settings, the cancel flag and (optionally) the background task
//! that issued the trigger.
//!
//! The only state shared with other threads is the [`CancelToken`] flag and
//! the one-shot outcome cell of the [`BackgroundTask`].

use crate::outcome::{FailureKind, MonitorOutcome, RecoveryFailure};
use catchup_core::{
    capture_begin_marker, BeginMarker, Error, Instance, Mechanism, MonitorConfig, Notification,
    Notifier, Result, TracingNotifier,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest uninterrupted sleep while waiting for the next poll
const SLEEP_SLICE: Duration = Duration::from_millis(50);

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancel flag
///
/// Setting the flag is a single atomic store, so it may be done from any
/// thread or from a signal handler. Canceling only stops the watching; the
/// recovery keeps running on the server.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// New, not canceled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with a signal handler
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Sleep for `duration` in short slices
    ///
    /// Returns `true` as soon as cancellation is seen, `false` once the
    /// full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_canceled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

// ============================================================================
// Background trigger
// ============================================================================

/// How the background trigger ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundOutcome {
    /// The trigger returned normally
    Completed,
    /// The trigger's connection dropped, as it does when the target restarts
    Disconnected,
    /// The trigger failed
    Failed {
        /// Server error number
        code: Option<u32>,
        /// Error text
        message: String,
    },
}

/// A recovery trigger running on its own thread
///
/// The trigger may block until the transfer finishes or its connection
/// drops, so it runs apart from the monitor and reports through a one-shot
/// cell that the monitor reads before declaring success.
pub struct BackgroundTask {
    name: String,
    outcome: Arc<OnceCell<BackgroundOutcome>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Run `work` on a new thread named `catchup-<name>`
    pub fn spawn<F>(name: &str, work: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let outcome = Arc::new(OnceCell::new());
        let cell = Arc::clone(&outcome);
        let task_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("catchup-{}", name))
            .spawn(move || {
                let result = match work() {
                    Ok(()) => BackgroundOutcome::Completed,
                    Err(e) if e.is_connection_lost() => {
                        debug!(target: "catchup::session", task = %task_name, error = %e, "Background task lost its connection");
                        BackgroundOutcome::Disconnected
                    }
                    Err(e) => {
                        error!(target: "catchup::session", task = %task_name, error = %e, "Background task failed");
                        BackgroundOutcome::Failed {
                            code: e.server_code(),
                            message: e.to_string(),
                        }
                    }
                };
                let _ = cell.set(result);
            })?;

        Ok(BackgroundTask {
            name: name.to_string(),
            outcome,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The outcome, if the task has finished
    pub fn outcome(&self) -> Option<BackgroundOutcome> {
        self.outcome.get().cloned()
    }

    /// The failure, if the task has finished with one
    pub fn failure(&self) -> Option<RecoveryFailure> {
        match self.outcome.get()? {
            BackgroundOutcome::Failed { code, message } => Some(RecoveryFailure::new(
                FailureKind::Background,
                *code,
                message.clone(),
            )),
            _ => None,
        }
    }

    /// Wait up to `timeout` for the task to finish
    ///
    /// Returns `None` if the task is still running when the time is up.
    pub fn wait(&self, timeout: Duration) -> Option<BackgroundOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = self
                .handle
                .lock()
                .as_ref()
                .map_or(true, JoinHandle::is_finished);
            if finished {
                return Some(self.join());
            }
            let now = Instant::now();
            if now >= deadline {
                return self.outcome();
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    /// Wait for the thread to exit and return its outcome
    pub fn join(&self) -> BackgroundOutcome {
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                let _ = self.outcome.set(BackgroundOutcome::Failed {
                    code: None,
                    message: format!("background task '{}' panicked", self.name),
                });
            }
        }
        self.outcome().unwrap_or(BackgroundOutcome::Completed)
    }
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("name", &self.name)
            .field("outcome", &self.outcome.get())
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

/// How a reconnect ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Connection re-established
    Back,
    /// Cancellation was requested before the target came back
    Canceled,
}

/// One supervised recovery of one target
pub struct RecoverySession {
    target: Arc<dyn Instance>,
    marker: BeginMarker,
    config: MonitorConfig,
    cancel: CancelToken,
    background: Option<BackgroundTask>,
    notifier: Arc<dyn Notifier>,
}

impl RecoverySession {
    /// Session for an operation whose marker was already captured
    pub fn new(target: Arc<dyn Instance>, marker: BeginMarker, config: MonitorConfig) -> Self {
        RecoverySession {
            target,
            marker,
            config,
            cancel: CancelToken::new(),
            background: None,
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Capture the marker from the target's clock and open a session
    ///
    /// Must be called before the recovery is triggered.
    pub fn begin(target: Arc<dyn Instance>, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let marker = capture_begin_marker(target.as_ref())?;
        debug!(target: "catchup::session", endpoint = target.endpoint(), %marker, "Captured begin marker");
        Ok(Self::new(target, marker, config))
    }

    /// Report through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share an existing cancel token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach the task that triggered the recovery
    pub fn with_background(mut self, task: BackgroundTask) -> Self {
        self.background = Some(task);
        self
    }

    /// Target handle
    pub fn target(&self) -> &dyn Instance {
        self.target.as_ref()
    }

    /// Target endpoint
    pub fn endpoint(&self) -> &str {
        self.target.endpoint()
    }

    /// Begin marker of this operation
    pub fn marker(&self) -> &BeginMarker {
        &self.marker
    }

    /// Polling settings
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Cancel token; clone it to cancel from elsewhere
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Attached background task
    pub fn background(&self) -> Option<&BackgroundTask> {
        self.background.as_ref()
    }

    /// Whether cancellation was requested
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Send a notification
    pub fn notify(&self, notification: Notification) {
        self.notifier.notify(&notification);
    }

    /// Sleep one poll interval; `true` if canceled meanwhile
    pub fn pause(&self) -> bool {
        self.cancel.sleep(self.config.poll_interval())
    }

    /// Failure recorded by the background task, if any
    pub fn background_failure(&self) -> Option<RecoveryFailure> {
        self.background.as_ref().and_then(BackgroundTask::failure)
    }

    /// Re-establish the connection after an unexpected loss
    ///
    /// Tries `reconnect_attempts` times (at least once), one poll interval
    /// apart. The last error is returned if every attempt fails; a cancel
    /// seen between attempts ends the loop with [`Reconnect::Canceled`].
    pub fn reconnect(&self) -> Result<Reconnect> {
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if self.is_canceled() {
                return Ok(Reconnect::Canceled);
            }
            match self.target.reconnect() {
                Ok(()) => {
                    info!(target: "catchup::session", endpoint = self.endpoint(), attempt, "Reconnected");
                    self.notify(Notification::Reconnected {
                        target: self.endpoint().to_string(),
                    });
                    return Ok(Reconnect::Back);
                }
                Err(e) => {
                    warn!(target: "catchup::session", endpoint = self.endpoint(), attempt, error = %e, "Reconnect failed");
                    last_error = Some(e);
                }
            }
            if attempt < attempts && self.pause() {
                return Ok(Reconnect::Canceled);
            }
        }
        Err(last_error.unwrap_or_else(|| {
            Error::server(
                catchup_core::error::CR_SERVER_LOST,
                format!("lost connection to {}", self.endpoint()),
            )
        }))
    }

    /// Report `Canceled`
    pub fn canceled(&self) -> MonitorOutcome {
        info!(target: "catchup::session", endpoint = self.endpoint(), "Monitoring canceled");
        self.notify(Notification::MonitoringCanceled {
            target: self.endpoint().to_string(),
        });
        MonitorOutcome::Canceled
    }

    /// Report `RestartTimeout`
    pub fn restart_timed_out(&self) -> MonitorOutcome {
        let timeout_secs = self.config.restart_timeout_secs;
        warn!(target: "catchup::session", endpoint = self.endpoint(), timeout_secs, "Target did not come back after restart");
        self.notify(Notification::RestartTimedOut {
            target: self.endpoint().to_string(),
            timeout_secs,
        });
        MonitorOutcome::RestartTimeout
    }

    /// Report success, unless the background task failed
    ///
    /// An attached background task is given up to the restart budget to
    /// record its outcome first.
    pub fn succeeded(&self, mechanism: Mechanism) -> MonitorOutcome {
        if let Some(task) = &self.background {
            let budget = Duration::from_secs(self.config.restart_timeout_secs);
            if task.wait(budget).is_none() {
                warn!(target: "catchup::session", endpoint = self.endpoint(), task = task.name(), "Background task still running");
            }
        }
        if let Some(failure) = self.background_failure() {
            return self.failed(mechanism, failure);
        }
        info!(target: "catchup::session", endpoint = self.endpoint(), %mechanism, "Recovery succeeded");
        self.notify(Notification::RecoverySucceeded {
            target: self.endpoint().to_string(),
            mechanism,
        });
        MonitorOutcome::Succeeded
    }

    /// Report a terminal failure
    pub fn failed(&self, mechanism: Mechanism, failure: RecoveryFailure) -> MonitorOutcome {
        error!(
            target: "catchup::session",
            endpoint = self.endpoint(),
            %mechanism,
            kind = ?failure.kind,
            code = ?failure.code,
            detail = %failure.message,
            "Recovery failed"
        );
        self.notify(Notification::RecoveryFailed {
            target: self.endpoint().to_string(),
            mechanism,
            code: failure.code,
            message: failure.to_string(),
        });
        MonitorOutcome::Failed(failure)
    }
}

impl std::fmt::Debug for RecoverySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverySession")
            .field("target", &self.endpoint())
            .field("marker", &self.marker)
            .field("config", &self.config)
            .field("canceled", &self.is_canceled())
            .field("background", &self.background)
            .finish()
    }
}
