//! Full-state-transfer supervision
//!
//! Polls the transfer status belonging to the session's begin marker and
//! feeds it through a [`StageTracker`]. The target restarts once the data
//! has been copied, so losing the connection is the expected way for the
//! transfer to end its copy phase:
//!
//! - orderly shutdown reported by the server: wait for the restart
//! - any other connection loss: logged as unexpected, then handled as a
//!   restart as well
//!
//! While restarting, the same logical endpoint is reconnected within the
//! restart budget; polling then resumes with the same marker so rows from
//! earlier operations are never mistaken for this one.

use crate::outcome::{FailureKind, MonitorOutcome, RecoveryFailure, ER_RESTART_SERVER_FAILED};
use crate::session::RecoverySession;
use crate::tracker::StageTracker;
use catchup_core::status::read_clone_status;
use catchup_core::{Mechanism, Notification, Result, StageState, StageStatus};
use tracing::{debug, info, warn};

const MECHANISM: Mechanism = Mechanism::FullStateTransfer;

/// How a restart wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartWait {
    Back,
    TimedOut,
    Canceled,
}

/// Supervise a full state transfer until it ends
///
/// Returns `Failed(StatusUnavailable)` if no status row for the marker
/// appears within the start budget.
pub fn monitor_full_transfer(
    session: &RecoverySession,
    tracker: &mut StageTracker,
) -> Result<MonitorOutcome> {
    let start_budget = session.config().start_iterations();
    let mut polls_without_status: u64 = 0;

    loop {
        if session.is_canceled() {
            return Ok(session.canceled());
        }
        if let Some(failure) = session.background_failure() {
            return Ok(session.failed(MECHANISM, failure));
        }

        match read_clone_status(session.target(), session.marker()) {
            Ok(Some(status)) => {
                polls_without_status = 0;
                if let Some(outcome) = render(session, tracker, &status) {
                    return Ok(outcome);
                }
            }
            Ok(None) => {
                polls_without_status += 1;
                debug!(target: "catchup::full_transfer", endpoint = session.endpoint(), polls_without_status, "No transfer status for this operation yet");
                if polls_without_status >= start_budget {
                    return Ok(session.failed(
                        MECHANISM,
                        RecoveryFailure::new(
                            FailureKind::StatusUnavailable,
                            None,
                            format!(
                                "no full state transfer status since {}",
                                session.marker()
                            ),
                        ),
                    ));
                }
            }
            Err(e) if e.is_connection_lost() => {
                let orderly = e.is_server_shutdown();
                if orderly {
                    info!(target: "catchup::full_transfer", endpoint = session.endpoint(), "Target shutting down to restart");
                } else {
                    warn!(target: "catchup::full_transfer", endpoint = session.endpoint(), error = %e, "Unexpected connection loss, assuming restart");
                }
                session.notify(Notification::RestartDetected {
                    target: session.endpoint().to_string(),
                    orderly,
                });
                match wait_for_restart(session) {
                    RestartWait::Back => continue,
                    RestartWait::Canceled => return Ok(session.canceled()),
                    RestartWait::TimedOut => return Ok(session.restart_timed_out()),
                }
            }
            Err(e) => return Err(e),
        }

        if session.pause() {
            return Ok(session.canceled());
        }
    }
}

fn render(
    session: &RecoverySession,
    tracker: &mut StageTracker,
    status: &StageStatus,
) -> Option<MonitorOutcome> {
    let rendered = tracker.update(status);
    debug!(
        target: "catchup::full_transfer",
        endpoint = session.endpoint(),
        current = ?rendered.current,
        state = %status.state,
        "Transfer status"
    );
    for event in rendered.events {
        session.notify(Notification::Progress {
            target: session.endpoint().to_string(),
            event,
        });
    }

    match rendered.terminal? {
        StageState::Completed => Some(session.succeeded(MECHANISM)),
        _ => Some(session.failed(MECHANISM, transfer_failure(status))),
    }
}

fn transfer_failure(status: &StageStatus) -> RecoveryFailure {
    let message = status
        .error_message
        .clone()
        .unwrap_or_else(|| format!("transfer from {} failed", status.source));
    let kind = if status.error_code == Some(ER_RESTART_SERVER_FAILED) {
        FailureKind::RestartNotSupervised
    } else {
        FailureKind::FullTransfer
    };
    RecoveryFailure::new(kind, status.error_code, message)
}

fn wait_for_restart(session: &RecoverySession) -> RestartWait {
    let budget = session.config().restart_iterations();
    for attempt in 1..=budget {
        if session.pause() {
            return RestartWait::Canceled;
        }
        match session.target().reconnect() {
            Ok(()) => {
                info!(target: "catchup::full_transfer", endpoint = session.endpoint(), attempt, "Target is back");
                session.notify(Notification::Reconnected {
                    target: session.endpoint().to_string(),
                });
                return RestartWait::Back;
            }
            Err(e) => {
                debug!(target: "catchup::full_transfer", endpoint = session.endpoint(), attempt, error = %e, "Target not back yet");
            }
        }
    }
    RestartWait::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use catchup_core::testing::{CloneRow, ScriptedInstance, ServerStatus, ServerStep};
    use catchup_core::{BeginMarker, MonitorConfig, Stage};
    use std::sync::Arc;

    const MARKER: &str = "2026-10-19 10:00:00.000000";
    const BEGIN: &str = "2026-10-19 10:00:01.000";

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 5,
            start_timeout_secs: 1,
            restart_timeout_secs: 1,
            reconnect_attempts: 1,
        }
    }

    fn session(target: Arc<ScriptedInstance>) -> RecoverySession {
        RecoverySession::new(target, BeginMarker::new(MARKER), config())
    }

    #[test]
    fn test_failure_3707_is_restart_not_supervised() {
        let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
            ServerStep::Status(ServerStatus::clone_transfer(
                CloneRow::failed(BEGIN, ER_RESTART_SERVER_FAILED, "Restart server failed (mysqld is not managed by supervisor process)."),
                vec![Stage::new("RESTART", StageState::Failed)],
            )),
        ]));
        let outcome = monitor_full_transfer(&session(target), &mut StageTracker::new()).unwrap();
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::RestartNotSupervised);
        assert_eq!(failure.code, Some(ER_RESTART_SERVER_FAILED));
    }

    #[test]
    fn test_missing_status_runs_out() {
        let target = Arc::new(ScriptedInstance::new("db2:3306"));
        let outcome = monitor_full_transfer(&session(target), &mut StageTracker::new()).unwrap();
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::StatusUnavailable);
    }

    #[test]
    fn test_transfer_failure_message_falls_back_to_source() {
        let status = StageStatus {
            stages: vec![],
            state: StageState::Failed,
            error_code: None,
            error_message: None,
            source: "db1:3306".into(),
        };
        let failure = transfer_failure(&status);
        assert_eq!(failure.kind, FailureKind::FullTransfer);
        assert!(failure.message.contains("db1:3306"));
    }
}
