//! Shared fixtures for monitor integration tests.

#![allow(dead_code)]

use catchup_core::testing::{CloneRow, RecordingNotifier, ScriptedInstance, ServerStatus, ServerStep};
use catchup_core::{BeginMarker, MonitorConfig, Stage, StageState};
use catchup_monitor::RecoverySession;
use std::sync::{Arc, Once};

static INIT_TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Server clock reading taken before the trigger
pub const MARKER: &str = "2026-10-19 10:00:00.000000";
/// Transfer begin time belonging to this operation
pub const BEGIN: &str = "2026-10-19 10:00:01.125";
/// Transfer begin time of an earlier operation
pub const STALE_BEGIN: &str = "2026-10-18 22:15:00.000";

pub const STAGE_NAMES: [&str; 7] = [
    "DROP DATA",
    "FILE COPY",
    "PAGE COPY",
    "REDO COPY",
    "FILE SYNC",
    "RESTART",
    "RECOVERY",
];

/// Fast polling, one-second budgets
pub fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval_ms: 5,
        start_timeout_secs: 1,
        restart_timeout_secs: 1,
        reconnect_attempts: 1,
    }
}

/// Stage list where `states[i]` is the state of stage `i`; the running
/// stage reports `done` of 100 units
pub fn stages(states: &[StageState], done: u64) -> Vec<Stage> {
    states
        .iter()
        .zip(STAGE_NAMES.iter())
        .map(|(state, name)| {
            let mut stage = Stage::new(*name, *state);
            match state {
                StageState::InProgress => {
                    stage.work_completed = done;
                    stage.work_estimated = 100;
                }
                StageState::Completed => {
                    stage.work_completed = 100;
                    stage.work_estimated = 100;
                    stage.elapsed_secs = 2.0;
                }
                _ => {}
            }
            stage
        })
        .collect()
}

/// Transfer in progress with the first `completed` stages done
pub fn transfer_at(completed: usize, done: u64) -> ServerStep {
    let mut states = vec![StageState::NotStarted; STAGE_NAMES.len()];
    for state in states.iter_mut().take(completed) {
        *state = StageState::Completed;
    }
    if completed < states.len() {
        states[completed] = StageState::InProgress;
    }
    ServerStep::Status(ServerStatus::clone_transfer(
        CloneRow::new(StageState::InProgress, BEGIN),
        stages(&states, done),
    ))
}

/// Transfer finished successfully
pub fn transfer_completed(begin: &str) -> ServerStep {
    ServerStep::Status(ServerStatus::clone_transfer(
        CloneRow::new(StageState::Completed, begin),
        stages(&[StageState::Completed; 7], 0),
    ))
}

/// Session over `target` reporting into `notifier`
pub fn session_for(
    target: Arc<ScriptedInstance>,
    notifier: Arc<RecordingNotifier>,
    config: MonitorConfig,
) -> RecoverySession {
    RecoverySession::new(target, BeginMarker::new(MARKER), config).with_notifier(notifier)
}

/// No statement other than a read reached the target
pub fn assert_read_only(target: &ScriptedInstance) {
    for sql in target.queries() {
        assert!(sql.starts_with("SELECT"), "non-read statement issued: {}", sql);
    }
}
