//! Testing utilities for catch-up supervision
//!
//! - **ScriptedInstance**: fake server that plays back status steps,
//!   including restarts and orderly shutdowns
//! - **StaticTopology**: fixed member list for the purge-aware check
//! - **RecordingNotifier**: captures notifications for assertions
//!
//! # Example
//!
//! ```ignore
//! use catchup_core::testing::{ScriptedInstance, ServerStatus, ServerStep};
//! use catchup_core::status::MemberState;
//!
//! let target = ScriptedInstance::new("db2:3306").with_steps(vec![
//!     ServerStep::Status(ServerStatus::member(MemberState::Recovering)),
//!     ServerStep::Status(ServerStatus::member(MemberState::Online)),
//! ]);
//! ```

mod scripted_instance;

pub use scripted_instance::{CloneRow, ScriptedInstance, ServerStatus, ServerStep};

use crate::error::Result;
use crate::instance::{Instance, Topology};
use crate::notify::{Notification, Notifier, ProgressEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Topology over a fixed list of members
///
/// Members whose check fails with a connection error are skipped, like
/// unreachable members of a real cluster.
#[derive(Default)]
pub struct StaticTopology {
    members: Vec<Arc<dyn Instance>>,
    visited: AtomicUsize,
}

impl StaticTopology {
    /// Topology with the given members
    pub fn new(members: Vec<Arc<dyn Instance>>) -> Self {
        StaticTopology {
            members,
            visited: AtomicUsize::new(0),
        }
    }

    /// Members handed to predicates so far
    pub fn visited(&self) -> usize {
        self.visited.load(Ordering::Relaxed)
    }
}

impl Topology for StaticTopology {
    fn any_member(
        &self,
        predicate: &mut dyn FnMut(&dyn Instance) -> Result<bool>,
    ) -> Result<bool> {
        for member in &self.members {
            self.visited.fetch_add(1, Ordering::Relaxed);
            match predicate(member.as_ref()) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_connection_lost() => {
                    debug!(endpoint = member.endpoint(), error = %e, "Skipping unreachable member");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}

/// Notifier that keeps everything it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications, in order
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    /// Only the full-state-transfer progress events, in order
    pub fn progress_events(&self) -> Vec<ProgressEvent> {
        self.received
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Progress { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of notifications matching `pred`
    pub fn count(&self, pred: impl Fn(&Notification) -> bool) -> usize {
        self.received.lock().iter().filter(|n| pred(n)).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.received.lock().push(notification.clone());
    }
}
