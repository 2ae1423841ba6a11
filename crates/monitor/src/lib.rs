//! Supervision of a node's catch-up recovery
//!
//! Once the recovery has been triggered on the target, this crate watches
//! it to a tagged outcome:
//! - start: which mechanism (if any) started for this operation
//! - full_transfer: stage-by-stage progress, surviving the target's restart
//! - incremental: member state plus recovery channel errors
//! - tracker: turns stage snapshots into progress events
//! - session: begin marker, cancellation, background trigger outcome
//!
//! The monitor only reads from the target. Canceling stops the watching,
//! never the recovery.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod full_transfer;
pub mod incremental;
pub mod outcome;
pub mod session;
pub mod start;
pub mod tracker;

pub use full_transfer::monitor_full_transfer;
pub use incremental::monitor_incremental;
pub use outcome::{FailureKind, MonitorOutcome, RecoveryFailure, StartDetection};
pub use session::{BackgroundOutcome, BackgroundTask, CancelToken, Reconnect, RecoverySession};
pub use start::wait_recovery_start;
pub use tracker::{RenderedProgress, StageTracker};

use catchup_core::{Mechanism, Result};

/// Supervise the detected `mechanism` to its outcome
pub fn monitor_recovery(session: &RecoverySession, mechanism: Mechanism) -> Result<MonitorOutcome> {
    match mechanism {
        Mechanism::FullStateTransfer => monitor_full_transfer(session, &mut StageTracker::new()),
        Mechanism::Incremental => monitor_incremental(session),
    }
}
