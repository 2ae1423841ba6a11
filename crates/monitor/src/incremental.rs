//! Incremental recovery supervision
//!
//! Watches the coarse member state and, while the member is recovering,
//! the recovery channel's receiver and applier errors so that a fatal
//! error ends the watch before the member state flips to `ERROR`.
//! Only errors stamped at or after the begin marker are considered.

use crate::outcome::{FailureKind, MonitorOutcome, RecoveryFailure, FATAL_RECEIVER_ERRORS};
use crate::session::{Reconnect, RecoverySession};
use catchup_core::status::{read_applier_errors, read_member_state, read_recovery_channel};
use catchup_core::{ChannelError, Mechanism, MemberState, Notification, Result};
use tracing::{debug, warn};

const MECHANISM: Mechanism = Mechanism::Incremental;

/// Supervise incremental recovery until the member is online or fails
pub fn monitor_incremental(session: &RecoverySession) -> Result<MonitorOutcome> {
    let mut watch = ChannelWatch::default();
    loop {
        if session.is_canceled() {
            return Ok(session.canceled());
        }
        if let Some(failure) = session.background_failure() {
            return Ok(session.failed(MECHANISM, failure));
        }

        match poll(session, &mut watch) {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {}
            Err(e) if e.is_connection_lost() => {
                warn!(target: "catchup::incremental", endpoint = session.endpoint(), error = %e, "Lost connection during incremental recovery");
                if session.reconnect()? == Reconnect::Canceled {
                    return Ok(session.canceled());
                }
                continue;
            }
            Err(e) => return Err(e),
        }

        if session.pause() {
            return Ok(session.canceled());
        }
    }
}

/// Receiver warnings already reported, keyed by error timestamp
#[derive(Debug, Default)]
struct ChannelWatch {
    last_warning: Option<String>,
}

impl ChannelWatch {
    fn is_new(&self, error: &ChannelError) -> bool {
        self.last_warning.as_deref() != Some(error.timestamp.as_str())
    }
}

fn poll(session: &RecoverySession, watch: &mut ChannelWatch) -> Result<Option<MonitorOutcome>> {
    let target = session.target();
    let state = read_member_state(target)?;
    debug!(target: "catchup::incremental", endpoint = session.endpoint(), ?state, "Member state");

    match state {
        Some(MemberState::Online) => Ok(Some(session.succeeded(MECHANISM))),
        Some(MemberState::Error) => Ok(Some(session.failed(
            MECHANISM,
            RecoveryFailure::new(
                FailureKind::Incremental,
                None,
                "member entered the ERROR state during recovery",
            ),
        ))),
        Some(MemberState::Offline) | None => Ok(Some(session.failed(
            MECHANISM,
            RecoveryFailure::new(
                FailureKind::MemberLeft,
                None,
                "member is no longer part of the group",
            ),
        ))),
        Some(MemberState::Unreachable) => Ok(None),
        Some(MemberState::Recovering) => check_channel(session, watch),
    }
}

fn check_channel(
    session: &RecoverySession,
    watch: &mut ChannelWatch,
) -> Result<Option<MonitorOutcome>> {
    let target = session.target();
    let marker = session.marker();

    if let Some(err) = read_applier_errors(target)?
        .into_iter()
        .find(|e| marker.admits(&e.timestamp))
    {
        return Ok(Some(session.failed(
            MECHANISM,
            RecoveryFailure::new(FailureKind::Applier, Some(err.code), err.message),
        )));
    }

    let receiver_error = read_recovery_channel(target)?
        .and_then(|channel| channel.last_error)
        .filter(|e| marker.admits(&e.timestamp));
    if let Some(err) = receiver_error {
        if FATAL_RECEIVER_ERRORS.contains(&err.code) {
            return Ok(Some(session.failed(
                MECHANISM,
                RecoveryFailure::new(FailureKind::Receiver, Some(err.code), err.message),
            )));
        }
        if watch.is_new(&err) {
            warn!(target: "catchup::incremental", endpoint = session.endpoint(), code = err.code, detail = %err.message, "Recovery channel error");
            watch.last_warning = Some(err.timestamp.clone());
            session.notify(Notification::ChannelWarning {
                target: session.endpoint().to_string(),
                error: err,
            });
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catchup_core::testing::{RecordingNotifier, ScriptedInstance, ServerStatus, ServerStep};
    use catchup_core::{BeginMarker, MonitorConfig};
    use std::sync::Arc;

    const MARKER: &str = "2026-10-19 10:00:00.000000";

    fn error_at(code: u32, timestamp: &str) -> ChannelError {
        ChannelError {
            code,
            message: format!("error {}", code),
            timestamp: timestamp.to_string(),
        }
    }

    fn run(steps: Vec<ServerStep>) -> (MonitorOutcome, Arc<RecordingNotifier>) {
        let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(steps));
        let notifier = Arc::new(RecordingNotifier::new());
        let config = MonitorConfig {
            poll_interval_ms: 2,
            ..MonitorConfig::default()
        };
        let session = RecoverySession::new(target, BeginMarker::new(MARKER), config)
            .with_notifier(notifier.clone());
        (monitor_incremental(&session).unwrap(), notifier)
    }

    #[test]
    fn test_stale_applier_error_ignored() {
        let (outcome, _) = run(vec![
            ServerStep::Status(
                ServerStatus::member(MemberState::Recovering)
                    .with_applier_error(error_at(1062, "2026-10-18 23:00:00.000000")),
            ),
            ServerStep::Status(ServerStatus::member(MemberState::Online)),
        ]);
        assert_eq!(outcome, MonitorOutcome::Succeeded);
    }

    #[test]
    fn test_unreachable_keeps_watching() {
        let (outcome, _) = run(vec![
            ServerStep::Status(ServerStatus::member(MemberState::Unreachable)),
            ServerStep::Status(ServerStatus::member(MemberState::Online)),
        ]);
        assert_eq!(outcome, MonitorOutcome::Succeeded);
    }

    #[test]
    fn test_error_state_fails() {
        let (outcome, notifier) = run(vec![ServerStep::Status(ServerStatus::member(
            MemberState::Error,
        ))]);
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::Incremental);
        assert_eq!(
            notifier.count(|n| matches!(n, Notification::RecoveryFailed { .. })),
            1
        );
    }

    #[test]
    fn test_fatal_receiver_error() {
        let (outcome, _) = run(vec![ServerStep::Status(
            ServerStatus::member(MemberState::Recovering)
                .with_channel("ON", Some(error_at(13114, "2026-10-19 10:00:02.000000"))),
        )]);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Receiver);
        assert_eq!(failure.code, Some(13114));
    }
}
