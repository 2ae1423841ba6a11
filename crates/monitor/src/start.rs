//! Recovery start detection
//!
//! After the trigger, the target shows which mechanism it runs: a
//! full-state-transfer status row stamped at or after the begin marker, or
//! a running recovery channel (or a member that is already past recovery).

use crate::outcome::StartDetection;
use crate::session::{Reconnect, RecoverySession};
use catchup_core::status::{read_clone_status, read_member_state, read_recovery_channel};
use catchup_core::{Mechanism, MemberState, Notification, Result};
use tracing::{debug, info, warn};

/// Wait until a recovery mechanism shows up on the target
///
/// Polls once per poll interval within the start budget. `Unknown` means
/// nothing was seen in time; the recovery may still be running and the
/// caller decides whether to keep watching.
pub fn wait_recovery_start(session: &RecoverySession) -> Result<StartDetection> {
    let budget = session.config().start_iterations();
    for iteration in 0..budget {
        if session.is_canceled() {
            session.canceled();
            return Ok(StartDetection::Canceled);
        }

        match detect_mechanism(session) {
            Ok(Some(mechanism)) => {
                info!(target: "catchup::start", endpoint = session.endpoint(), %mechanism, iteration, "Recovery started");
                session.notify(Notification::MechanismDetected {
                    target: session.endpoint().to_string(),
                    mechanism,
                });
                return Ok(StartDetection::Detected(mechanism));
            }
            Ok(None) => {
                debug!(target: "catchup::start", endpoint = session.endpoint(), iteration, "No recovery yet");
            }
            Err(e) if e.is_connection_lost() => {
                warn!(target: "catchup::start", endpoint = session.endpoint(), error = %e, "Lost connection while waiting for recovery start");
                if session.reconnect()? == Reconnect::Canceled {
                    session.canceled();
                    return Ok(StartDetection::Canceled);
                }
                continue;
            }
            Err(e) => return Err(e),
        }

        if session.pause() {
            session.canceled();
            return Ok(StartDetection::Canceled);
        }
    }

    warn!(target: "catchup::start", endpoint = session.endpoint(), budget, "Recovery start not detected");
    session.notify(Notification::StartUndetected {
        target: session.endpoint().to_string(),
    });
    Ok(StartDetection::Unknown)
}

fn detect_mechanism(session: &RecoverySession) -> Result<Option<Mechanism>> {
    let target = session.target();
    if read_clone_status(target, session.marker())?.is_some() {
        return Ok(Some(Mechanism::FullStateTransfer));
    }
    if let Some(channel) = read_recovery_channel(target)? {
        if channel.is_on() {
            return Ok(Some(Mechanism::Incremental));
        }
    }
    match read_member_state(target)? {
        Some(MemberState::Online) | Some(MemberState::Error) => Ok(Some(Mechanism::Incremental)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catchup_core::testing::{CloneRow, ScriptedInstance, ServerStatus, ServerStep};
    use catchup_core::{BeginMarker, MonitorConfig, StageState};
    use std::sync::Arc;

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 5,
            start_timeout_secs: 1,
            ..MonitorConfig::default()
        }
    }

    const MARKER: &str = "2026-10-19 10:00:00.000000";

    #[test]
    fn test_stale_clone_row_not_detected() {
        let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
            ServerStep::Status(ServerStatus::clone_transfer(
                CloneRow::new(StageState::Completed, "2026-10-18 09:00:00.000"),
                vec![],
            )),
        ]));
        let session = RecoverySession::new(target, BeginMarker::new(MARKER), config());
        assert_eq!(wait_recovery_start(&session).unwrap(), StartDetection::Unknown);
    }

    #[test]
    fn test_online_member_counts_as_incremental() {
        let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
            ServerStep::Status(ServerStatus::default()),
            ServerStep::Status(ServerStatus::member(MemberState::Online)),
        ]));
        let session = RecoverySession::new(target, BeginMarker::new(MARKER), config());
        assert_eq!(
            wait_recovery_start(&session).unwrap(),
            StartDetection::Detected(Mechanism::Incremental)
        );
    }

    #[test]
    fn test_connecting_channel_is_not_started() {
        let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
            ServerStep::Status(
                ServerStatus::member(MemberState::Recovering).with_channel("CONNECTING", None),
            ),
            ServerStep::Status(ServerStatus::member(MemberState::Recovering).with_channel("ON", None)),
        ]));
        let session = RecoverySession::new(target.clone(), BeginMarker::new(MARKER), config());
        assert_eq!(
            wait_recovery_start(&session).unwrap(),
            StartDetection::Detected(Mechanism::Incremental)
        );
        assert_eq!(target.step_index(), 1);
    }
}
