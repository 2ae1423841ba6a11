//! Start Detection Tests
//!
//! `wait_recovery_start` followed by `monitor_recovery` on the detected
//! mechanism, the way an orchestrator drives a supervised recovery.

mod common;

use catchup_core::testing::{CloneRow, RecordingNotifier, ScriptedInstance, ServerStatus, ServerStep};
use catchup_core::{Mechanism, MemberState, Notification, StageState};
use catchup_monitor::{monitor_recovery, wait_recovery_start, MonitorOutcome, StartDetection};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_full_transfer_detected_then_supervised() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
        ServerStep::Status(ServerStatus::clone_transfer(
            CloneRow::new(StageState::Completed, STALE_BEGIN),
            stages(&[StageState::Completed; 7], 0),
        )),
        transfer_at(0, 0),
        transfer_at(2, 40),
        ServerStep::Restart {
            orderly: true,
            failed_reconnects: 1,
        },
        transfer_completed(BEGIN),
    ]));
    let notifier = Arc::new(RecordingNotifier::new());
    let session = session_for(target.clone(), notifier.clone(), fast_config());

    let detection = wait_recovery_start(&session).unwrap();
    assert_eq!(detection, StartDetection::Detected(Mechanism::FullStateTransfer));
    let mechanism = match detection {
        StartDetection::Detected(m) => m,
        other => panic!("unexpected detection {:?}", other),
    };

    let outcome = monitor_recovery(&session, mechanism).unwrap();
    assert_eq!(outcome, MonitorOutcome::Succeeded);
    assert_eq!(
        notifier.count(|n| matches!(
            n,
            Notification::MechanismDetected {
                mechanism: Mechanism::FullStateTransfer,
                ..
            }
        )),
        1
    );
    assert_read_only(&target);
}

#[test]
fn test_incremental_detected_then_supervised() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
        ServerStep::Status(ServerStatus::member(MemberState::Recovering).with_channel("CONNECTING", None)),
        ServerStep::Status(ServerStatus::member(MemberState::Recovering).with_channel("ON", None)),
        ServerStep::Status(ServerStatus::member(MemberState::Recovering).with_channel("ON", None)),
        ServerStep::Status(ServerStatus::member(MemberState::Online)),
    ]));
    let notifier = Arc::new(RecordingNotifier::new());
    let session = session_for(target, notifier, fast_config());

    let detection = wait_recovery_start(&session).unwrap();
    assert_eq!(detection, StartDetection::Detected(Mechanism::Incremental));
    let outcome = monitor_recovery(&session, Mechanism::Incremental).unwrap();
    assert_eq!(outcome, MonitorOutcome::Succeeded);
}

#[test]
fn test_nothing_started_is_unknown() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![ServerStep::Status(
        ServerStatus::member(MemberState::Recovering).with_channel("CONNECTING", None),
    )]));
    let notifier = Arc::new(RecordingNotifier::new());
    let session = session_for(target, notifier.clone(), fast_config());

    assert_eq!(wait_recovery_start(&session).unwrap(), StartDetection::Unknown);
    assert_eq!(
        notifier.count(|n| matches!(n, Notification::StartUndetected { .. })),
        1
    );
}

#[test]
fn test_connection_loss_while_waiting_reconnects() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
        ServerStep::Restart {
            orderly: false,
            failed_reconnects: 0,
        },
        ServerStep::Status(ServerStatus::member(MemberState::Recovering).with_channel("ON", None)),
    ]));
    let session = session_for(target.clone(), Arc::new(RecordingNotifier::new()), fast_config());

    assert_eq!(
        wait_recovery_start(&session).unwrap(),
        StartDetection::Detected(Mechanism::Incremental)
    );
    assert_eq!(target.reconnect_count(), 1);
}

#[test]
fn test_failed_reconnect_while_waiting_is_raised() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![ServerStep::Restart {
        orderly: false,
        failed_reconnects: 10,
    }]));
    let session = session_for(target, Arc::new(RecordingNotifier::new()), fast_config());
    assert!(wait_recovery_start(&session).unwrap_err().is_connection_lost());
}

#[test]
fn test_canceled_before_start() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306"));
    let session = session_for(target.clone(), Arc::new(RecordingNotifier::new()), fast_config());
    session.cancel_token().cancel();
    assert_eq!(wait_recovery_start(&session).unwrap(), StartDetection::Canceled);
    assert!(target.queries().is_empty());
}

#[test]
fn test_transfer_started_within_marker_millisecond_detected() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![
        ServerStep::Status(ServerStatus::clone_transfer(
            CloneRow::new(StageState::InProgress, "2026-10-19 10:00:00.100"),
            stages(&[StageState::InProgress], 10),
        )),
    ]));
    let marker = catchup_core::BeginMarker::new("2026-10-19 10:00:00.100400");
    let session = catchup_monitor::RecoverySession::new(target, marker, fast_config());

    assert_eq!(
        wait_recovery_start(&session).unwrap(),
        StartDetection::Detected(Mechanism::FullStateTransfer)
    );
}

#[test]
fn test_cancel_while_reconnecting_before_start() {
    init_tracing();
    let target = Arc::new(ScriptedInstance::new("db2:3306").with_steps(vec![ServerStep::Restart {
        orderly: false,
        failed_reconnects: usize::MAX,
    }]));
    let mut config = fast_config();
    config.reconnect_attempts = 10;
    config.poll_interval_ms = 100;
    let session = session_for(target, Arc::new(RecordingNotifier::new()), config);

    let token = session.cancel_token().clone();
    let canceler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        token.cancel();
    });
    assert_eq!(wait_recovery_start(&session).unwrap(), StartDetection::Canceled);
    canceler.join().unwrap();
}
