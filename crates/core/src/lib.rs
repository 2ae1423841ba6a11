//! Core types and contracts for replicated-node catch-up
//!
//! This crate defines the foundational pieces shared by the classifier,
//! the decision engine and the recovery monitor:
//! - TransactionSet: GTID-set algebra (parse, subset, difference)
//! - Version: server versions and full-state-transfer compatibility
//! - Instance / Topology: collaborator contracts for servers and members
//! - status: fixed status statements and typed snapshots (stages, member
//!   state, recovery channel errors)
//! - BeginMarker: server-clock correlation key for one recovery operation
//! - Notification / Notifier: structured outcomes for the console layer
//! - MonitorConfig: polling and timeout settings (`catchup.toml`)
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod gtid;
pub mod instance;
pub mod marker;
pub mod notify;
pub mod status;
pub mod testing;
pub mod types;
pub mod version;

pub use config::{MonitorConfig, CONFIG_FILE_NAME};
pub use error::{Error, Result};
pub use gtid::{Interval, TransactionSet};
pub use instance::{Instance, Row, Topology};
pub use marker::{capture_begin_marker, BeginMarker};
pub use notify::{Notification, Notifier, NullNotifier, ProgressEvent, TracingNotifier};
pub use status::{
    ChannelError, ChannelStatus, MemberState, Stage, StageState, StageStatus,
};
pub use types::{Mechanism, RecoveryDecision, RecoveryMethod, TransactionSetRelation};
pub use version::Version;
