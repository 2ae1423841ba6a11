//! Step-scripted fake server
//!
//! A [`ScriptedInstance`] plays back a list of [`ServerStep`]s. The current
//! step answers every status query; the script advances when a status
//! statement is issued a second time within the same step, i.e. at the
//! start of the caller's next poll iteration. The last step repeats forever.
//!
//! `Restart` steps make every query fail (first with the orderly-shutdown
//! error if `orderly`, then with "lost connection") until `reconnect`
//! succeeds, which happens after `failed_reconnects` refused attempts and
//! moves the script to the following step.

use crate::error::{Error, Result, CR_CONN_HOST_ERROR, CR_SERVER_LOST, ER_SERVER_SHUTDOWN};
use crate::instance::{Instance, Row};
use crate::status::{
    self, ChannelError, ChannelStatus, MemberState, Stage, StageState,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;

/// The `clone_status` row of a scripted step
#[derive(Debug, Clone, PartialEq)]
pub struct CloneRow {
    /// Overall state
    pub state: StageState,
    /// `BEGIN_TIME` column
    pub begin_time: String,
    /// `SOURCE` column
    pub source: String,
    /// `ERROR_NO` / `ERROR_MESSAGE`
    pub error: Option<(u32, String)>,
}

impl CloneRow {
    /// Row without an error
    pub fn new(state: StageState, begin_time: &str) -> Self {
        CloneRow {
            state,
            begin_time: begin_time.to_string(),
            source: "donor:3306".to_string(),
            error: None,
        }
    }

    /// Failed row with an error
    pub fn failed(begin_time: &str, code: u32, message: &str) -> Self {
        CloneRow {
            error: Some((code, message.to_string())),
            ..CloneRow::new(StageState::Failed, begin_time)
        }
    }
}

/// Server-side status visible during one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStatus {
    /// Latest clone status row
    pub clone: Option<CloneRow>,
    /// Clone progress rows
    pub stages: Vec<Stage>,
    /// Member state; `None` means not a member
    pub member_state: Option<MemberState>,
    /// Recovery channel receiver status
    pub channel: Option<ChannelStatus>,
    /// Recovery channel applier errors
    pub applier_errors: Vec<ChannelError>,
}

impl ServerStatus {
    /// Status with a clone row and its stages
    pub fn clone_transfer(clone: CloneRow, stages: Vec<Stage>) -> Self {
        ServerStatus {
            clone: Some(clone),
            stages,
            ..Default::default()
        }
    }

    /// Status with only a member state
    pub fn member(state: MemberState) -> Self {
        ServerStatus {
            member_state: Some(state),
            ..Default::default()
        }
    }

    /// Add a recovery channel
    pub fn with_channel(mut self, service_state: &str, last_error: Option<ChannelError>) -> Self {
        self.channel = Some(ChannelStatus {
            service_state: service_state.to_string(),
            last_error,
        });
        self
    }

    /// Add an applier error
    pub fn with_applier_error(mut self, error: ChannelError) -> Self {
        self.applier_errors.push(error);
        self
    }
}

/// One step of a server script
#[derive(Debug, Clone, PartialEq)]
pub enum ServerStep {
    /// Server is up and shows this status
    Status(ServerStatus),
    /// Server is down for a restart
    Restart {
        /// The first failing query reports an orderly shutdown
        orderly: bool,
        /// Reconnect attempts refused before the server is back
        failed_reconnects: usize,
    },
}

#[derive(Debug)]
struct ScriptState {
    steps: Vec<ServerStep>,
    position: usize,
    served: HashSet<&'static str>,
    shutdown_reported: bool,
    refused_reconnects: usize,
    reconnects: usize,
    queries: Vec<String>,
    gtid_executed: String,
    gtid_purged: String,
    version: String,
    server_uuid: String,
    now: String,
}

impl ScriptState {
    fn current(&self) -> Option<&ServerStep> {
        self.steps.get(self.position)
    }

    fn advance(&mut self) {
        if self.position + 1 < self.steps.len() {
            self.position += 1;
            self.served.clear();
            self.shutdown_reported = false;
            self.refused_reconnects = 0;
        }
    }

    fn down_error(&mut self) -> Option<Error> {
        let orderly = match self.current() {
            Some(ServerStep::Restart { orderly, .. }) => *orderly,
            _ => return None,
        };
        if orderly && !self.shutdown_reported {
            self.shutdown_reported = true;
            Some(Error::server(ER_SERVER_SHUTDOWN, "Server shutdown in progress"))
        } else {
            Some(Error::server(
                CR_SERVER_LOST,
                "Lost connection to MySQL server during query",
            ))
        }
    }
}

/// Fake [`Instance`] driven by a script of server steps
#[derive(Debug)]
pub struct ScriptedInstance {
    endpoint: String,
    state: Mutex<ScriptState>,
}

const STATUS_QUERIES: &[&str] = &[
    status::CLONE_STATUS_QUERY,
    status::CLONE_PROGRESS_QUERY,
    status::MEMBER_STATE_QUERY,
    status::RECOVERY_CHANNEL_QUERY,
    status::APPLIER_ERRORS_QUERY,
];

impl ScriptedInstance {
    /// Instance with an empty history and no status
    pub fn new(endpoint: &str) -> Self {
        ScriptedInstance {
            endpoint: endpoint.to_string(),
            state: Mutex::new(ScriptState {
                steps: Vec::new(),
                position: 0,
                served: HashSet::new(),
                shutdown_reported: false,
                refused_reconnects: 0,
                reconnects: 0,
                queries: Vec::new(),
                gtid_executed: String::new(),
                gtid_purged: String::new(),
                version: "8.0.36".to_string(),
                server_uuid: uuid::Uuid::new_v4().to_string(),
                now: "2026-10-19 10:00:00.000000".to_string(),
            }),
        }
    }

    /// Set `gtid_executed`
    pub fn with_gtid_executed(self, gtids: &str) -> Self {
        self.state.lock().gtid_executed = gtids.to_string();
        self
    }

    /// Set `gtid_purged`
    pub fn with_gtid_purged(self, gtids: &str) -> Self {
        self.state.lock().gtid_purged = gtids.to_string();
        self
    }

    /// Set the version string
    pub fn with_version(self, version: &str) -> Self {
        self.state.lock().version = version.to_string();
        self
    }

    /// Set the server clock reading
    pub fn with_now(self, now: &str) -> Self {
        self.state.lock().now = now.to_string();
        self
    }

    /// Set the step script
    pub fn with_steps(self, steps: Vec<ServerStep>) -> Self {
        {
            let mut state = self.state.lock();
            state.steps = steps;
            state.position = 0;
            state.served.clear();
        }
        self
    }

    /// Every statement received, in order
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }

    /// Number of reconnect calls
    pub fn reconnect_count(&self) -> usize {
        self.state.lock().reconnects
    }

    /// Index of the current step
    pub fn step_index(&self) -> usize {
        self.state.lock().position
    }

    fn render(status: &ServerStatus, sql: &str) -> Vec<Row> {
        match sql {
            s if s == status::CLONE_STATUS_QUERY => status
                .clone
                .iter()
                .map(|c| {
                    let (code, message) = c.error.clone().unwrap_or((0, String::new()));
                    Row::new()
                        .with("STATE", c.state.to_string())
                        .with("BEGIN_TIME", c.begin_time.clone())
                        .with("END_TIME", Value::Null)
                        .with("SOURCE", c.source.clone())
                        .with("ERROR_NO", code)
                        .with("ERROR_MESSAGE", message)
                })
                .collect(),
            s if s == status::CLONE_PROGRESS_QUERY => status
                .stages
                .iter()
                .map(|stage| {
                    Row::new()
                        .with("STAGE", stage.name.clone())
                        .with("STATE", stage.state.to_string())
                        .with("ELAPSED", stage.elapsed_secs)
                        .with("ESTIMATE", stage.work_estimated)
                        .with("DATA", stage.work_completed)
                })
                .collect(),
            s if s == status::MEMBER_STATE_QUERY => status
                .member_state
                .iter()
                .map(|m| {
                    let text = match m {
                        MemberState::Recovering => "RECOVERING",
                        MemberState::Online => "ONLINE",
                        MemberState::Error => "ERROR",
                        MemberState::Offline => "OFFLINE",
                        MemberState::Unreachable => "UNREACHABLE",
                    };
                    Row::new().with("MEMBER_STATE", text)
                })
                .collect(),
            s if s == status::RECOVERY_CHANNEL_QUERY => status
                .channel
                .iter()
                .map(|ch| {
                    error_columns(Row::new(), ch.last_error.as_ref())
                        .with("SERVICE_STATE", ch.service_state.clone())
                })
                .collect(),
            s if s == status::APPLIER_ERRORS_QUERY => status
                .applier_errors
                .iter()
                .enumerate()
                .map(|(i, e)| error_columns(Row::new(), Some(e)).with("WORKER_ID", i as u64 + 1))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn error_columns(row: Row, error: Option<&ChannelError>) -> Row {
    match error {
        Some(e) => row
            .with("LAST_ERROR_NUMBER", e.code)
            .with("LAST_ERROR_MESSAGE", e.message.clone())
            .with("LAST_ERROR_TIMESTAMP", e.timestamp.clone()),
        None => row
            .with("LAST_ERROR_NUMBER", 0)
            .with("LAST_ERROR_MESSAGE", "")
            .with("LAST_ERROR_TIMESTAMP", "0000-00-00 00:00:00.000000"),
    }
}

impl Instance for ScriptedInstance {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut state = self.state.lock();
        state.queries.push(sql.to_string());

        if let Some(kind) = STATUS_QUERIES.iter().copied().find(|q| *q == sql) {
            let up = matches!(state.current(), Some(ServerStep::Status(_)));
            if up && state.served.contains(kind) {
                state.advance();
            }
            state.served.insert(kind);
        }

        if let Some(err) = state.down_error() {
            return Err(err);
        }

        let scalar =
            |column: &str, value: &str| -> Result<Vec<Row>> { Ok(vec![Row::new().with(column, value)]) };
        match sql {
            s if s == status::SERVER_TIME_QUERY => scalar("now", &state.now),
            s if s == status::VERSION_QUERY => scalar("version", &state.version),
            s if s == status::SERVER_UUID_QUERY => scalar("server_uuid", &state.server_uuid),
            s if s == status::GTID_EXECUTED_QUERY => scalar("gtid_executed", &state.gtid_executed),
            s if s == status::GTID_PURGED_QUERY => scalar("gtid_purged", &state.gtid_purged),
            s if STATUS_QUERIES.contains(&s) => match state.current() {
                Some(ServerStep::Status(status)) => Ok(Self::render(status, s)),
                _ => Ok(Vec::new()),
            },
            other => Err(Error::server(
                1064,
                format!("unexpected statement in script: {}", other),
            )),
        }
    }

    fn reconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.reconnects += 1;
        let refused = match state.current() {
            Some(ServerStep::Restart {
                failed_reconnects, ..
            }) => Some(*failed_reconnects),
            _ => None,
        };
        match refused {
            Some(limit) if state.refused_reconnects < limit => {
                state.refused_reconnects += 1;
                Err(Error::server(
                    CR_CONN_HOST_ERROR,
                    format!("Can't connect to MySQL server on '{}'", self.endpoint),
                ))
            }
            Some(_) => {
                state.advance();
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_queries() {
        let inst = ScriptedInstance::new("db1:3306")
            .with_gtid_executed("uuid1:1-10")
            .with_version("8.0.30-log");
        assert_eq!(inst.gtid_executed().unwrap().count(), 10);
        assert!(inst.gtid_purged().unwrap().is_empty());
        assert_eq!(inst.version().unwrap().patch, 30);
        assert_eq!(inst.server_time().unwrap(), "2026-10-19 10:00:00.000000");
    }

    #[test]
    fn test_advances_on_repeated_status_query() {
        let inst = ScriptedInstance::new("db1:3306").with_steps(vec![
            ServerStep::Status(ServerStatus::member(MemberState::Recovering)),
            ServerStep::Status(ServerStatus::member(MemberState::Online)),
        ]);
        assert_eq!(
            status::read_member_state(&inst).unwrap(),
            Some(MemberState::Recovering)
        );
        assert_eq!(
            status::read_member_state(&inst).unwrap(),
            Some(MemberState::Online)
        );
        // last step repeats
        assert_eq!(
            status::read_member_state(&inst).unwrap(),
            Some(MemberState::Online)
        );
    }

    #[test]
    fn test_restart_step() {
        let inst = ScriptedInstance::new("db1:3306").with_steps(vec![
            ServerStep::Status(ServerStatus::member(MemberState::Recovering)),
            ServerStep::Restart {
                orderly: true,
                failed_reconnects: 1,
            },
            ServerStep::Status(ServerStatus::member(MemberState::Online)),
        ]);
        status::read_member_state(&inst).unwrap();
        let err = status::read_member_state(&inst).unwrap_err();
        assert!(err.is_server_shutdown());
        let err = status::read_member_state(&inst).unwrap_err();
        assert!(err.is_connection_lost() && !err.is_server_shutdown());
        assert!(inst.reconnect().is_err());
        assert!(inst.reconnect().is_ok());
        assert_eq!(
            status::read_member_state(&inst).unwrap(),
            Some(MemberState::Online)
        );
        assert_eq!(inst.reconnect_count(), 2);
    }

    #[test]
    fn test_unknown_statement_rejected() {
        let inst = ScriptedInstance::new("db1:3306");
        assert!(inst.query("STOP GROUP_REPLICATION").is_err());
    }
}
