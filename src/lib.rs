//! Catch-up recovery for replicated database nodes
//!
//! Before a node joins, rejoins or is failed over into a replicated
//! cluster, its transaction history is compared with a donor's, a recovery
//! method is chosen, and the recovery is then supervised to completion.
//!
//! # Quick Start
//!
//! ```ignore
//! use catchup::{classify, wait_recovery_start, monitor_recovery, DecisionEngine,
//!     RecoveryOperation, RecoveryPolicy, RecoverySession, StartDetection, TracingNotifier};
//!
//! let notifier = TracingNotifier;
//! let classification = classify(&donor, &target, Some(&topology), &notifier)?;
//! let policy = RecoveryPolicy::for_versions(donor.version()?, target.version()?);
//! let decision = DecisionEngine::new(&notifier)
//!     .decide(target.endpoint(), &classification, &policy, RecoveryOperation::Join)?;
//!
//! let session = RecoverySession::begin(target.clone(), config)?;
//! // ... trigger the recovery ...
//! if let StartDetection::Detected(mechanism) = wait_recovery_start(&session)? {
//!     let outcome = monitor_recovery(&session, mechanism)?;
//! }
//! ```
//!
//! # Architecture
//!
//! - `catchup-core`: transaction sets, server contracts, status readers,
//!   notifications, configuration and errors
//! - `catchup-engine`: classifier and decision engine
//! - `catchup-monitor`: start detection, supervision, stage tracking

pub use catchup_core::*;
pub use catchup_engine::*;
pub use catchup_monitor::*;
