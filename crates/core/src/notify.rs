//! Structured notifications
//!
//! The core reports what it decided and observed as [`Notification`]
//! values handed to a [`Notifier`]. Rendering them for humans (progress
//! bars, colours, wording) is entirely up to the notifier implementation.

use crate::gtid::TransactionSet;
use crate::status::{ChannelError, StageState};
use crate::types::{Mechanism, RecoveryDecision};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Progress of a full state transfer, produced by the stage tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// A stage was seen running for the first time
    StageStarted {
        /// Stage index
        index: usize,
        /// Stage name
        name: String,
    },
    /// Work counters of the running stage
    StageProgress {
        /// Stage index
        index: usize,
        /// Stage name
        name: String,
        /// Work done
        completed: u64,
        /// Work estimated
        estimated: u64,
    },
    /// A stage reached a terminal state
    StageFinished {
        /// Stage index
        index: usize,
        /// Stage name
        name: String,
        /// `Completed` or `Failed`
        state: StageState,
        /// Seconds the stage took
        elapsed_secs: f64,
    },
    /// The whole transfer completed
    Completed,
    /// The whole transfer failed
    Failed {
        /// Server error number
        code: Option<u32>,
        /// Server error message
        message: String,
    },
}

impl ProgressEvent {
    /// Completion ratio for `StageProgress`, in `0.0..=1.0`
    pub fn ratio(&self) -> Option<f64> {
        match self {
            ProgressEvent::StageProgress {
                completed,
                estimated,
                ..
            } => {
                if *estimated == 0 {
                    Some(0.0)
                } else {
                    Some((*completed as f64 / *estimated as f64).min(1.0))
                }
            }
            _ => None,
        }
    }

    /// Whether this event ends the transfer
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Completed | ProgressEvent::Failed { .. })
    }
}

/// Something the core decided or observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// Target has transactions the donor lacks
    ErrantTransactions {
        /// Target endpoint
        target: String,
        /// Errant transactions
        errant: TransactionSet,
    },
    /// Transactions the target needs were purged on the donor
    PurgedTransactionsMissing {
        /// Target endpoint
        target: String,
        /// Needed but purged transactions
        missing: TransactionSet,
    },
    /// The decision engine resolved a method
    RecoveryDecided {
        /// Target endpoint
        target: String,
        /// The decision
        decision: RecoveryDecision,
    },
    /// A recovery mechanism was detected on the target
    MechanismDetected {
        /// Target endpoint
        target: String,
        /// What started
        mechanism: Mechanism,
    },
    /// Nothing was detected in time; recovery continues in the background
    StartUndetected {
        /// Target endpoint
        target: String,
    },
    /// Full-state-transfer progress
    Progress {
        /// Target endpoint
        target: String,
        /// The event
        event: ProgressEvent,
    },
    /// The target went away, presumably to restart
    RestartDetected {
        /// Target endpoint
        target: String,
        /// The server announced an orderly shutdown
        orderly: bool,
    },
    /// Connection to the target re-established
    Reconnected {
        /// Target endpoint
        target: String,
    },
    /// Non-fatal recovery channel error
    ChannelWarning {
        /// Target endpoint
        target: String,
        /// The error
        error: ChannelError,
    },
    /// The target did not come back from a restart within the budget
    RestartTimedOut {
        /// Target endpoint
        target: String,
        /// Restart budget that ran out
        timeout_secs: u64,
    },
    /// Monitoring stopped at the caller's request
    MonitoringCanceled {
        /// Target endpoint
        target: String,
    },
    /// Recovery finished successfully
    RecoverySucceeded {
        /// Target endpoint
        target: String,
        /// Mechanism that ran
        mechanism: Mechanism,
    },
    /// Recovery finished with an error
    RecoveryFailed {
        /// Target endpoint
        target: String,
        /// Mechanism that ran
        mechanism: Mechanism,
        /// Server error number
        code: Option<u32>,
        /// Error detail
        message: String,
    },
}

/// Sink for notifications
pub trait Notifier: Send + Sync {
    /// Receive one notification
    fn notify(&self, notification: &Notification);
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: &Notification) {}
}

/// Notifier that logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::ErrantTransactions { target, errant } => {
                warn!(target: "catchup::notify", endpoint = %target, %errant, "Errant transactions detected")
            }
            Notification::PurgedTransactionsMissing { target, missing } => {
                warn!(target: "catchup::notify", endpoint = %target, %missing, "Required transactions were purged")
            }
            Notification::RecoveryDecided { target, decision } => info!(
                target: "catchup::notify",
                endpoint = %target,
                method = %decision.method,
                possible = decision.possible,
                safe = decision.safe,
                "Recovery method decided"
            ),
            Notification::MechanismDetected { target, mechanism } => {
                info!(target: "catchup::notify", endpoint = %target, %mechanism, "Recovery started")
            }
            Notification::StartUndetected { target } => {
                warn!(target: "catchup::notify", endpoint = %target, "Recovery start not detected, continuing in background")
            }
            Notification::Progress { target, event } => {
                info!(target: "catchup::notify", endpoint = %target, ?event, "Recovery progress")
            }
            Notification::RestartDetected { target, orderly } => {
                info!(target: "catchup::notify", endpoint = %target, orderly, "Target restarting")
            }
            Notification::Reconnected { target } => {
                info!(target: "catchup::notify", endpoint = %target, "Reconnected to target")
            }
            Notification::ChannelWarning { target, error } => warn!(
                target: "catchup::notify",
                endpoint = %target,
                code = error.code,
                detail = %error.message,
                "Recovery channel error"
            ),
            Notification::RestartTimedOut {
                target,
                timeout_secs,
            } => error!(
                target: "catchup::notify",
                endpoint = %target,
                timeout_secs,
                "Target did not come back after restart, check it manually"
            ),
            Notification::MonitoringCanceled { target } => {
                info!(target: "catchup::notify", endpoint = %target, "Monitoring canceled, recovery continues")
            }
            Notification::RecoverySucceeded { target, mechanism } => {
                info!(target: "catchup::notify", endpoint = %target, %mechanism, "Recovery completed")
            }
            Notification::RecoveryFailed {
                target,
                mechanism,
                code,
                message,
            } => error!(
                target: "catchup::notify",
                endpoint = %target,
                %mechanism,
                ?code,
                detail = %message,
                "Recovery failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_ratio() {
        let ev = ProgressEvent::StageProgress {
            index: 2,
            name: "PAGE COPY".into(),
            completed: 60,
            estimated: 100,
        };
        assert_eq!(ev.ratio(), Some(0.6));
        let zero = ProgressEvent::StageProgress {
            index: 0,
            name: "DROP DATA".into(),
            completed: 5,
            estimated: 0,
        };
        assert_eq!(zero.ratio(), Some(0.0));
        assert_eq!(ProgressEvent::Completed.ratio(), None);
    }

    #[test]
    fn test_ratio_clamped() {
        let ev = ProgressEvent::StageProgress {
            index: 1,
            name: "FILE COPY".into(),
            completed: 120,
            estimated: 100,
        };
        assert_eq!(ev.ratio(), Some(1.0));
    }

    #[test]
    fn test_terminal_events() {
        assert!(ProgressEvent::Completed.is_terminal());
        assert!(ProgressEvent::Failed {
            code: Some(3862),
            message: "x".into()
        }
        .is_terminal());
        assert!(!ProgressEvent::StageStarted {
            index: 0,
            name: "x".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_tracing_notifier_accepts_every_variant() {
        let n = TracingNotifier;
        n.notify(&Notification::StartUndetected {
            target: "db:3306".into(),
        });
        n.notify(&Notification::RestartTimedOut {
            target: "db:3306".into(),
            timeout_secs: 60,
        });
        n.notify(&Notification::RecoveryFailed {
            target: "db:3306".into(),
            mechanism: Mechanism::Incremental,
            code: Some(1236),
            message: "purged".into(),
        });
    }
}
