//! Tagged results of supervision calls
//!
//! Terminal recovery failures, cancellation and restart timeouts are all
//! values here rather than errors: `Err` from a monitor call means the
//! monitor itself could not do its job (e.g. a reconnect failed while
//! waiting for the start).

use catchup_core::Mechanism;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Restart after a full state transfer failed because no supervisor
/// manages the server process
pub const ER_RESTART_SERVER_FAILED: u32 = 3707;

/// Donor could not serve a needed transaction from its binary log
pub const ER_SOURCE_FATAL_ERROR_READING_BINLOG: u32 = 1236;

/// Donor reported a fatal error while sending its binary log
pub const ER_SERVER_SOURCE_FATAL_ERROR_READING_BINLOG: u32 = 13114;

/// Receiver error codes that end incremental recovery
pub const FATAL_RECEIVER_ERRORS: &[u32] = &[
    ER_SOURCE_FATAL_ERROR_READING_BINLOG,
    ER_SERVER_SOURCE_FATAL_ERROR_READING_BINLOG,
];

/// What went wrong in a failed recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The full state transfer reported an error
    FullTransfer,
    /// The transfer finished but the server could not restart itself
    RestartNotSupervised,
    /// The member went to `ERROR` during incremental recovery
    Incremental,
    /// An applier worker of the recovery channel failed
    Applier,
    /// The recovery channel receiver hit a fatal error
    Receiver,
    /// The background task that triggered the recovery failed
    Background,
    /// The target stopped being a member
    MemberLeft,
    /// No status for this operation appeared in time
    StatusUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::FullTransfer => "full state transfer failed",
            FailureKind::RestartNotSupervised => "server restart not supervised",
            FailureKind::Incremental => "incremental recovery failed",
            FailureKind::Applier => "recovery applier error",
            FailureKind::Receiver => "recovery receiver error",
            FailureKind::Background => "recovery trigger failed",
            FailureKind::MemberLeft => "target left the group",
            FailureKind::StatusUnavailable => "recovery status unavailable",
        };
        f.write_str(s)
    }
}

/// A terminal recovery failure with the server-reported detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryFailure {
    /// Category
    pub kind: FailureKind,
    /// Server error number, when the server reported one
    pub code: Option<u32>,
    /// Error text
    pub message: String,
}

impl RecoveryFailure {
    /// Failure with an optional server error code
    pub fn new(kind: FailureKind, code: Option<u32>, message: impl Into<String>) -> Self {
        RecoveryFailure {
            kind,
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RecoveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (error {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Result of supervising a recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorOutcome {
    /// The target caught up
    Succeeded,
    /// Recovery ended with an error
    Failed(RecoveryFailure),
    /// Watching stopped at the caller's request; the recovery continues
    Canceled,
    /// The target did not come back after its restart
    RestartTimeout,
}

impl MonitorOutcome {
    /// `Succeeded` or `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorOutcome::Succeeded | MonitorOutcome::Failed(_))
    }

    /// The failure, if any
    pub fn failure(&self) -> Option<&RecoveryFailure> {
        match self {
            MonitorOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Result of waiting for a recovery to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartDetection {
    /// A mechanism is running for this operation
    Detected(Mechanism),
    /// Nothing seen within the start budget; recovery may still be running
    Unknown,
    /// Waiting stopped at the caller's request
    Canceled,
}
