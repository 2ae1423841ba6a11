//! Recoverability decisions for replicated-node catch-up
//!
//! This crate answers the two questions asked before a node is recovered:
//! - classify: how does the target's transaction history relate to the donor's?
//! - decision: given that relation and the cluster's policy, recover
//!   incrementally or through a full state transfer?
//!
//! Neither step changes anything on any server.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod decision;

pub use classify::{classify, compare_sets, member_holds_transactions, Classification};
pub use decision::{
    incremental_safety, DecisionEngine, FixedResolver, RecoveryOperation, RecoveryPolicy, RecoveryPrompt,
    RecoveryResolver,
};
