//! Server-side recovery status
//!
//! Fixed read statements against the server's status tables and the typed
//! snapshots the monitor works with. Nothing here writes to the server.
//!
//! ## Tables
//!
//! - `clone_status` / `clone_progress`: full state transfer, one status row
//!   for the most recent operation and one progress row per stage
//! - `replication_group_members`: coarse member state
//! - `replication_connection_status`: recovery channel receiver
//! - `replication_applier_status_by_worker`: recovery channel applier

use crate::error::Result;
use crate::instance::{Instance, Row};
use crate::marker::BeginMarker;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Statements
// ============================================================================

/// Server clock with microsecond precision
pub const SERVER_TIME_QUERY: &str = "SELECT NOW(6) AS now";
/// Server version string
pub const VERSION_QUERY: &str = "SELECT @@version AS version";
/// Server UUID
pub const SERVER_UUID_QUERY: &str = "SELECT @@server_uuid AS server_uuid";
/// Executed transaction set
pub const GTID_EXECUTED_QUERY: &str = "SELECT @@GLOBAL.gtid_executed AS gtid_executed";
/// Purged transaction set
pub const GTID_PURGED_QUERY: &str = "SELECT @@GLOBAL.gtid_purged AS gtid_purged";

/// Most recent full-state-transfer status row
pub const CLONE_STATUS_QUERY: &str = "SELECT STATE, BEGIN_TIME, END_TIME, SOURCE, ERROR_NO, \
     ERROR_MESSAGE FROM performance_schema.clone_status ORDER BY ID DESC LIMIT 1";

/// Per-stage full-state-transfer progress, in stage order
pub const CLONE_PROGRESS_QUERY: &str = "SELECT STAGE, STATE, \
     TIMESTAMPDIFF(MICROSECOND, BEGIN_TIME, IFNULL(END_TIME, NOW(6))) / 1000000 AS ELAPSED, \
     ESTIMATE, DATA FROM performance_schema.clone_progress ORDER BY ID";

/// This server's member state
pub const MEMBER_STATE_QUERY: &str = "SELECT MEMBER_STATE FROM \
     performance_schema.replication_group_members WHERE MEMBER_ID = @@server_uuid";

/// Receiver side of the recovery channel
pub const RECOVERY_CHANNEL_QUERY: &str = "SELECT SERVICE_STATE, LAST_ERROR_NUMBER, \
     LAST_ERROR_MESSAGE, LAST_ERROR_TIMESTAMP FROM performance_schema.replication_connection_status \
     WHERE CHANNEL_NAME = 'group_replication_recovery'";

/// Applier workers of the recovery channel that report an error
pub const APPLIER_ERRORS_QUERY: &str = "SELECT WORKER_ID, LAST_ERROR_NUMBER, \
     LAST_ERROR_MESSAGE, LAST_ERROR_TIMESTAMP FROM \
     performance_schema.replication_applier_status_by_worker \
     WHERE CHANNEL_NAME = 'group_replication_recovery' AND LAST_ERROR_NUMBER <> 0";

// ============================================================================
// Full state transfer
// ============================================================================

/// State of one stage, or of the whole transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageState {
    /// Not started yet
    NotStarted,
    /// Running
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl StageState {
    /// Parse the server's textual state (`Not Started`, `In Progress`, ...)
    pub fn from_server(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "in progress" => StageState::InProgress,
            "completed" => StageState::Completed,
            "failed" => StageState::Failed,
            _ => StageState::NotStarted,
        }
    }

    /// Completed or failed
    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Completed | StageState::Failed)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageState::NotStarted => "Not Started",
            StageState::InProgress => "In Progress",
            StageState::Completed => "Completed",
            StageState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One ordered stage of a full state transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name (`DROP DATA`, `FILE COPY`, ..., `RECOVERY`)
    pub name: String,
    /// Stage state
    pub state: StageState,
    /// Seconds spent in the stage so far
    pub elapsed_secs: f64,
    /// Work done (bytes for copy stages)
    pub work_completed: u64,
    /// Work estimated for the stage
    pub work_estimated: u64,
}

impl Stage {
    /// Stage with no work counters
    pub fn new(name: impl Into<String>, state: StageState) -> Self {
        Stage {
            name: name.into(),
            state,
            elapsed_secs: 0.0,
            work_completed: 0,
            work_estimated: 0,
        }
    }
}

/// Snapshot of a full state transfer's stages and overall state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    /// Stages in execution order
    pub stages: Vec<Stage>,
    /// Overall state
    pub state: StageState,
    /// Server error number when failed
    pub error_code: Option<u32>,
    /// Server error message when failed
    pub error_message: Option<String>,
    /// Donor the data is copied from
    pub source: String,
}

impl StageStatus {
    /// Index of the stage currently being worked on
    ///
    /// The first `InProgress` stage; otherwise the stage before the first
    /// `NotStarted` one (`None` if that is the first stage); otherwise the
    /// last stage. Derived purely from the snapshot, so it is correct again
    /// right after a reconnect.
    pub fn current_stage_index(&self) -> Option<usize> {
        if let Some(i) = self
            .stages
            .iter()
            .position(|s| s.state == StageState::InProgress)
        {
            return Some(i);
        }
        match self
            .stages
            .iter()
            .position(|s| s.state == StageState::NotStarted)
        {
            Some(0) => None,
            Some(i) => Some(i - 1),
            None => self.stages.len().checked_sub(1),
        }
    }
}

/// Read the full-state-transfer status belonging to `marker`
///
/// Returns `None` when there is no status row, or when the row was started
/// before `marker` (a leftover from an earlier operation).
pub fn read_clone_status(
    instance: &dyn Instance,
    marker: &BeginMarker,
) -> Result<Option<StageStatus>> {
    let rows = instance.query(CLONE_STATUS_QUERY)?;
    let row = match rows.first() {
        Some(row) => row,
        None => return Ok(None),
    };
    match row.opt_string("BEGIN_TIME")? {
        Some(begin) if marker.admits(&begin) => {}
        _ => return Ok(None),
    }

    let state = StageState::from_server(&row.string("STATE")?);
    let code = row.u32_or_zero("ERROR_NO")?;
    let message = row.opt_string("ERROR_MESSAGE")?.filter(|m| !m.is_empty());

    let stages = instance
        .query(CLONE_PROGRESS_QUERY)?
        .iter()
        .map(stage_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(StageStatus {
        stages,
        state,
        error_code: (code != 0).then_some(code),
        error_message: message,
        source: row.opt_string("SOURCE")?.unwrap_or_default(),
    }))
}

fn stage_from_row(row: &Row) -> Result<Stage> {
    Ok(Stage {
        name: row.string("STAGE")?,
        state: StageState::from_server(&row.string("STATE")?),
        elapsed_secs: row.f64_or_zero("ELAPSED")?,
        work_completed: row.u64_or_zero("DATA")?,
        work_estimated: row.u64_or_zero("ESTIMATE")?,
    })
}

// ============================================================================
// Incremental recovery
// ============================================================================

/// Coarse member state of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberState {
    /// Catching up through the recovery channel
    Recovering,
    /// Fully caught up
    Online,
    /// Recovery failed
    Error,
    /// Not running group replication
    Offline,
    /// Unreachable from the group's point of view
    Unreachable,
}

impl MemberState {
    /// Parse the server's textual member state
    pub fn from_server(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "RECOVERING" => MemberState::Recovering,
            "ONLINE" => MemberState::Online,
            "ERROR" => MemberState::Error,
            "UNREACHABLE" => MemberState::Unreachable,
            _ => MemberState::Offline,
        }
    }
}

/// Read the target's member state; `None` if it is not a member
pub fn read_member_state(instance: &dyn Instance) -> Result<Option<MemberState>> {
    let rows = instance.query(MEMBER_STATE_QUERY)?;
    match rows.first() {
        Some(row) => Ok(Some(MemberState::from_server(&row.string("MEMBER_STATE")?))),
        None => Ok(None),
    }
}

/// An error recorded by a replication channel thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelError {
    /// Error number
    pub code: u32,
    /// Error text
    pub message: String,
    /// When the error was recorded (server clock)
    pub timestamp: String,
}

/// Receiver status of the recovery channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// `CONNECTING`, `ON` or `OFF`
    pub service_state: String,
    /// Most recent receiver error, if any
    pub last_error: Option<ChannelError>,
}

impl ChannelStatus {
    /// Receiver has left the connecting sub-state and is running
    pub fn is_on(&self) -> bool {
        self.service_state.eq_ignore_ascii_case("ON")
    }
}

fn channel_error_from_row(row: &Row) -> Result<Option<ChannelError>> {
    let code = row.u32_or_zero("LAST_ERROR_NUMBER")?;
    if code == 0 {
        return Ok(None);
    }
    Ok(Some(ChannelError {
        code,
        message: row.opt_string("LAST_ERROR_MESSAGE")?.unwrap_or_default(),
        timestamp: row.opt_string("LAST_ERROR_TIMESTAMP")?.unwrap_or_default(),
    }))
}

/// Read the recovery channel receiver status; `None` if the channel does not exist
pub fn read_recovery_channel(instance: &dyn Instance) -> Result<Option<ChannelStatus>> {
    let rows = instance.query(RECOVERY_CHANNEL_QUERY)?;
    let row = match rows.first() {
        Some(row) => row,
        None => return Ok(None),
    };
    Ok(Some(ChannelStatus {
        service_state: row.string("SERVICE_STATE")?,
        last_error: channel_error_from_row(row)?,
    }))
}

/// Read applier worker errors of the recovery channel
pub fn read_applier_errors(instance: &dyn Instance) -> Result<Vec<ChannelError>> {
    let mut errors = Vec::new();
    for row in instance.query(APPLIER_ERRORS_QUERY)? {
        if let Some(err) = channel_error_from_row(&row)? {
            errors.push(err);
        }
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(states: &[StageState]) -> StageStatus {
        StageStatus {
            stages: states
                .iter()
                .enumerate()
                .map(|(i, s)| Stage::new(format!("S{}", i), *s))
                .collect(),
            state: StageState::InProgress,
            error_code: None,
            error_message: None,
            source: "donor:3306".into(),
        }
    }

    use StageState::*;

    #[test]
    fn test_current_stage_in_progress() {
        let s = status(&[Completed, Completed, InProgress, NotStarted, NotStarted]);
        assert_eq!(s.current_stage_index(), Some(2));
        // idempotent
        assert_eq!(s.current_stage_index(), s.current_stage_index());
    }

    #[test]
    fn test_current_stage_not_started() {
        let s = status(&[NotStarted, NotStarted]);
        assert_eq!(s.current_stage_index(), None);
    }

    #[test]
    fn test_current_stage_between_stages() {
        let s = status(&[Completed, NotStarted, NotStarted]);
        assert_eq!(s.current_stage_index(), Some(0));
    }

    #[test]
    fn test_current_stage_all_terminal() {
        let s = status(&[Completed, Completed, Failed]);
        assert_eq!(s.current_stage_index(), Some(2));
        assert_eq!(status(&[]).current_stage_index(), None);
    }

    #[test]
    fn test_stage_state_parsing() {
        assert_eq!(StageState::from_server("In Progress"), InProgress);
        assert_eq!(StageState::from_server("Completed"), Completed);
        assert_eq!(StageState::from_server("Failed"), Failed);
        assert_eq!(StageState::from_server("Not Started"), NotStarted);
        assert!(Completed.is_terminal() && Failed.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn test_member_state_parsing() {
        assert_eq!(MemberState::from_server("ONLINE"), MemberState::Online);
        assert_eq!(MemberState::from_server("recovering"), MemberState::Recovering);
        assert_eq!(MemberState::from_server("ERROR"), MemberState::Error);
        assert_eq!(MemberState::from_server("OFFLINE"), MemberState::Offline);
    }

    struct FixedRows(Vec<Row>);

    impl Instance for FixedRows {
        fn endpoint(&self) -> &str {
            "db2:3306"
        }
        fn query(&self, _sql: &str) -> Result<Vec<Row>> {
            Ok(self.0.clone())
        }
        fn reconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_out_of_range_error_number_rejected() {
        let worker = |code: u64| {
            Row::new()
                .with("WORKER_ID", 1)
                .with("LAST_ERROR_NUMBER", code)
                .with("LAST_ERROR_MESSAGE", "Worker 1 failed")
                .with("LAST_ERROR_TIMESTAMP", "2026-10-19 10:00:02.000000")
        };

        let errors = read_applier_errors(&FixedRows(vec![worker(1062)])).unwrap();
        assert_eq!(errors[0].code, 1062);

        let wrapped = u64::from(u32::MAX) + 1062;
        assert!(matches!(
            read_applier_errors(&FixedRows(vec![worker(wrapped)])),
            Err(crate::error::Error::UnexpectedValue { .. })
        ));
    }
}
