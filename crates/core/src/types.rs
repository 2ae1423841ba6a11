//! Shared value types for classification, decisions and detection

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the target's history relates to the donor's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionSetRelation {
    /// Target has no history yet
    New,
    /// Same history as the donor
    Identical,
    /// Target's history is a subset of the donor's and nothing needed was purged
    RecoverableSubset,
    /// Target is missing transactions that were purged everywhere
    Irrecoverable,
    /// Target has transactions the donor does not (errant transactions)
    Diverged,
}

impl fmt::Display for TransactionSetRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionSetRelation::New => "new",
            TransactionSetRelation::Identical => "identical",
            TransactionSetRelation::RecoverableSubset => "recoverable",
            TransactionSetRelation::Irrecoverable => "irrecoverable",
            TransactionSetRelation::Diverged => "diverged",
        };
        f.write_str(s)
    }
}

/// Recovery method, as requested by the caller or resolved by the engine
///
/// `Auto` is only meaningful as input; the decision engine never returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecoveryMethod {
    /// Let the engine decide
    #[default]
    Auto,
    /// Replace the target's data with a snapshot of a donor
    FullStateTransfer,
    /// Replay the missing transactions
    Incremental,
}

impl RecoveryMethod {
    /// The mechanism this method activates on the server, if resolved
    pub fn mechanism(self) -> Option<Mechanism> {
        match self {
            RecoveryMethod::Auto => None,
            RecoveryMethod::FullStateTransfer => Some(Mechanism::FullStateTransfer),
            RecoveryMethod::Incremental => Some(Mechanism::Incremental),
        }
    }
}

impl fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryMethod::Auto => "auto",
            RecoveryMethod::FullStateTransfer => "clone",
            RecoveryMethod::Incremental => "incremental",
        };
        f.write_str(s)
    }
}

/// Outcome of the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    /// Resolved method, never `Auto`
    pub method: RecoveryMethod,
    /// Incremental recovery is not blocked by missing transactions
    pub possible: bool,
    /// Incremental recovery is also known not to risk silent inconsistency
    pub safe: bool,
    /// Target has errant transactions
    pub diverged: bool,
}

/// Recovery mechanism observed running on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    /// Full state transfer (clone)
    FullStateTransfer,
    /// Incremental recovery through the recovery channel
    Incremental,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mechanism::FullStateTransfer => f.write_str("clone"),
            Mechanism::Incremental => f.write_str("incremental"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mechanism() {
        assert_eq!(RecoveryMethod::Auto.mechanism(), None);
        assert_eq!(
            RecoveryMethod::FullStateTransfer.mechanism(),
            Some(Mechanism::FullStateTransfer)
        );
        assert_eq!(RecoveryMethod::Incremental.mechanism(), Some(Mechanism::Incremental));
        assert_eq!(RecoveryMethod::default(), RecoveryMethod::Auto);
    }
}
