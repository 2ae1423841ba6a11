//! Recovery-method decision engine
//!
//! Turns a [`Classification`] and a [`RecoveryPolicy`] into a definite
//! [`RecoveryMethod`]. The engine prefers incremental recovery whenever it
//! is provably safe, and asks the operator (through a
//! [`RecoveryResolver`]) only when safety cannot be proven. Every error it
//! raises happens before anything destructive has been done, so callers can
//! retry after resolving the ambiguity.
//!
//! ## Decision table (in order)
//!
//! | Requested | Relation | Result |
//! |-----------|----------|--------|
//! | full transfer | any | full transfer, unless unsupported/disabled |
//! | incremental | any | incremental if possible (and safe, for rejoin) |
//! | auto | identical / recoverable | incremental |
//! | auto | new, complete history assumed | incremental |
//! | auto | new | ask: incremental or full transfer |
//! | auto | diverged | ask: full transfer only |
//! | auto | irrecoverable | ask: full transfer (incremental too if target is empty) |

use crate::classify::Classification;
use catchup_core::{
    Error, Notification, Notifier, RecoveryDecision, RecoveryMethod, Result,
    TransactionSetRelation, Version,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Inputs that constrain which recovery method may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Donor and target can perform a full state transfer
    pub full_transfer_supported: bool,
    /// Full state transfer is administratively disabled
    pub full_transfer_disabled: bool,
    /// The cluster asserts its history is complete, so empty targets can
    /// safely be completed incrementally
    pub assume_complete_history: bool,
    /// What the caller asked for
    pub requested_method: RecoveryMethod,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryPolicy {
            full_transfer_supported: true,
            full_transfer_disabled: false,
            assume_complete_history: false,
            requested_method: RecoveryMethod::Auto,
        }
    }
}

impl RecoveryPolicy {
    /// Policy whose full-transfer support is derived from server versions
    pub fn for_versions(donor: Version, target: Version) -> Self {
        RecoveryPolicy {
            full_transfer_supported: Version::clone_compatible(donor, target),
            ..Default::default()
        }
    }

    /// Set the requested method
    pub fn with_requested(mut self, method: RecoveryMethod) -> Self {
        self.requested_method = method;
        self
    }

    /// Set whether full transfer is administratively disabled
    pub fn with_full_transfer_disabled(mut self, disabled: bool) -> Self {
        self.full_transfer_disabled = disabled;
        self
    }

    /// Set whether the cluster history is assumed complete
    pub fn with_assume_complete_history(mut self, complete: bool) -> Self {
        self.assume_complete_history = complete;
        self
    }

    /// Full state transfer can actually be used
    pub fn full_transfer_available(&self) -> bool {
        self.full_transfer_supported && !self.full_transfer_disabled
    }
}

/// The operation the recovery is part of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOperation {
    /// Adding a new member
    Join,
    /// Bringing back a former member
    Rejoin,
}

/// Question put to the operator when the engine cannot decide alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPrompt {
    /// Target endpoint
    pub target: String,
    /// Classification the question is about
    pub relation: TransactionSetRelation,
    /// Full state transfer may be chosen
    pub offer_full_transfer: bool,
    /// Incremental recovery may be chosen
    pub offer_incremental: bool,
    /// Why the engine could not decide
    pub reason: String,
}

impl RecoveryPrompt {
    /// Whether `method` was one of the offered answers
    pub fn offers(&self, method: RecoveryMethod) -> bool {
        match method {
            RecoveryMethod::FullStateTransfer => self.offer_full_transfer,
            RecoveryMethod::Incremental => self.offer_incremental,
            RecoveryMethod::Auto => false,
        }
    }
}

/// Interactive source of recovery choices
pub trait RecoveryResolver {
    /// Pick one of the offered methods, or `None` to abort
    fn choose(&self, prompt: &RecoveryPrompt) -> Option<RecoveryMethod>;
}

/// Resolver that gives the same answer to every prompt
///
/// Used for non-interactive runs where the operator fixed the answer up
/// front (`None` aborts every prompt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedResolver(pub Option<RecoveryMethod>);

impl RecoveryResolver for FixedResolver {
    fn choose(&self, _prompt: &RecoveryPrompt) -> Option<RecoveryMethod> {
        self.0
    }
}

/// Whether incremental recovery is possible and safe for `relation`
pub fn incremental_safety(relation: TransactionSetRelation, assume_complete_history: bool) -> (bool, bool) {
    match relation {
        TransactionSetRelation::Identical | TransactionSetRelation::RecoverableSubset => (true, true),
        TransactionSetRelation::New => (true, assume_complete_history),
        TransactionSetRelation::Irrecoverable | TransactionSetRelation::Diverged => (false, false),
    }
}

/// Resolves recovery methods
pub struct DecisionEngine<'a> {
    notifier: &'a dyn Notifier,
    resolver: Option<&'a dyn RecoveryResolver>,
}

impl<'a> DecisionEngine<'a> {
    /// Non-interactive engine
    pub fn new(notifier: &'a dyn Notifier) -> Self {
        DecisionEngine {
            notifier,
            resolver: None,
        }
    }

    /// Engine that asks `resolver` when a choice is needed
    pub fn with_resolver(mut self, resolver: &'a dyn RecoveryResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Resolve the recovery method for `target`
    ///
    /// # Errors
    ///
    /// - `AmbiguousRecovery`: a choice is required and there is no resolver
    /// - `RecoveryImpossible`: no usable method exists
    /// - `InvalidRecoveryMethod`: the requested (or chosen) method is not allowed
    /// - `RecoveryAborted`: the resolver declined
    pub fn decide(
        &self,
        target: &str,
        classification: &Classification,
        policy: &RecoveryPolicy,
        operation: RecoveryOperation,
    ) -> Result<RecoveryDecision> {
        let relation = classification.relation;
        let (possible, safe) = incremental_safety(relation, policy.assume_complete_history);
        debug!(
            target: "catchup::decision",
            endpoint = target,
            %relation,
            possible,
            safe,
            requested = %policy.requested_method,
            "Deciding recovery method"
        );

        let method = match policy.requested_method {
            RecoveryMethod::FullStateTransfer => {
                if !policy.full_transfer_supported {
                    return Err(Error::InvalidRecoveryMethod {
                        reason: "full state transfer is not supported between donor and target"
                            .into(),
                    });
                }
                if policy.full_transfer_disabled {
                    return Err(Error::InvalidRecoveryMethod {
                        reason: "full state transfer is disabled for this cluster".into(),
                    });
                }
                RecoveryMethod::FullStateTransfer
            }
            RecoveryMethod::Incremental => {
                if !possible {
                    return Err(Error::RecoveryImpossible {
                        target: target.to_string(),
                        reason: format!(
                            "incremental recovery cannot be used: transaction set is {}",
                            relation
                        ),
                    });
                }
                if operation == RecoveryOperation::Rejoin && !safe {
                    return Err(Error::InvalidRecoveryMethod {
                        reason: "incremental recovery is not known to be safe for this rejoin"
                            .into(),
                    });
                }
                RecoveryMethod::Incremental
            }
            RecoveryMethod::Auto => self.decide_auto(target, classification, policy, safe)?,
        };

        let decision = RecoveryDecision {
            method,
            possible,
            safe,
            diverged: relation == TransactionSetRelation::Diverged,
        };
        info!(
            target: "catchup::decision",
            endpoint = target,
            method = %decision.method,
            "Recovery method decided"
        );
        self.notifier.notify(&Notification::RecoveryDecided {
            target: target.to_string(),
            decision,
        });
        Ok(decision)
    }

    fn decide_auto(
        &self,
        target: &str,
        classification: &Classification,
        policy: &RecoveryPolicy,
        safe: bool,
    ) -> Result<RecoveryMethod> {
        let relation = classification.relation;
        let available = policy.full_transfer_available();
        match relation {
            TransactionSetRelation::Identical | TransactionSetRelation::RecoverableSubset => {
                Ok(RecoveryMethod::Incremental)
            }
            TransactionSetRelation::New if safe => Ok(RecoveryMethod::Incremental),
            TransactionSetRelation::New => self.ask(RecoveryPrompt {
                target: target.to_string(),
                relation,
                offer_full_transfer: available,
                offer_incremental: true,
                reason: "target has an empty transaction set and the cluster history is not \
                         known to be complete; incremental recovery may silently miss data"
                    .into(),
            }),
            TransactionSetRelation::Diverged | TransactionSetRelation::Irrecoverable => {
                let reason = if relation == TransactionSetRelation::Diverged {
                    format!(
                        "target has errant transactions not present on the donor: {}",
                        classification.errant
                    )
                } else {
                    format!(
                        "transactions needed by the target were purged from every reachable member: {}",
                        classification.missing_purged
                    )
                };
                if !available {
                    return Err(Error::RecoveryImpossible {
                        target: target.to_string(),
                        reason,
                    });
                }
                self.ask(RecoveryPrompt {
                    target: target.to_string(),
                    relation,
                    offer_full_transfer: true,
                    offer_incremental: relation == TransactionSetRelation::Irrecoverable
                        && classification.target_history_empty,
                    reason,
                })
            }
        }
    }

    fn ask(&self, prompt: RecoveryPrompt) -> Result<RecoveryMethod> {
        let resolver = match self.resolver {
            Some(r) => r,
            None => {
                return Err(Error::AmbiguousRecovery {
                    target: prompt.target,
                    reason: prompt.reason,
                })
            }
        };
        match resolver.choose(&prompt) {
            None => Err(Error::RecoveryAborted {
                target: prompt.target,
            }),
            Some(method) if prompt.offers(method) => Ok(method),
            Some(method) => Err(Error::InvalidRecoveryMethod {
                reason: format!("'{}' was not one of the offered recovery methods", method),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catchup_core::NullNotifier;

    fn decide(
        relation: TransactionSetRelation,
        policy: RecoveryPolicy,
    ) -> Result<RecoveryDecision> {
        DecisionEngine::new(&NullNotifier).decide(
            "db2:3306",
            &Classification::from_relation(relation),
            &policy,
            RecoveryOperation::Join,
        )
    }

    #[test]
    fn test_subset_always_incremental() {
        for supported in [true, false] {
            let policy = RecoveryPolicy {
                full_transfer_supported: supported,
                ..Default::default()
            };
            let d = decide(TransactionSetRelation::RecoverableSubset, policy).unwrap();
            assert_eq!(d.method, RecoveryMethod::Incremental);
            assert!(d.possible && d.safe && !d.diverged);
        }
    }

    #[test]
    fn test_new_with_complete_history_incremental() {
        let policy = RecoveryPolicy::default().with_assume_complete_history(true);
        let d = decide(TransactionSetRelation::New, policy).unwrap();
        assert_eq!(d.method, RecoveryMethod::Incremental);
    }

    #[test]
    fn test_new_without_complete_history_is_ambiguous() {
        let err = decide(TransactionSetRelation::New, RecoveryPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::AmbiguousRecovery { .. }));
    }

    #[test]
    fn test_diverged_without_full_transfer_impossible() {
        let policy = RecoveryPolicy::default().with_full_transfer_disabled(true);
        let err = decide(TransactionSetRelation::Diverged, policy).unwrap_err();
        assert!(matches!(err, Error::RecoveryImpossible { .. }));
    }

    #[test]
    fn test_explicit_full_transfer_disabled_rejected() {
        let policy = RecoveryPolicy::default()
            .with_full_transfer_disabled(true)
            .with_requested(RecoveryMethod::FullStateTransfer);
        let err = decide(TransactionSetRelation::Identical, policy).unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryMethod { .. }));
    }

    #[test]
    fn test_explicit_incremental_on_diverged_impossible() {
        let policy = RecoveryPolicy::default().with_requested(RecoveryMethod::Incremental);
        let err = decide(TransactionSetRelation::Diverged, policy).unwrap_err();
        assert!(matches!(err, Error::RecoveryImpossible { .. }));
    }

    #[test]
    fn test_resolver_answers() {
        let classification = Classification::from_relation(TransactionSetRelation::Diverged);
        let policy = RecoveryPolicy::default();

        let clone = FixedResolver(Some(RecoveryMethod::FullStateTransfer));
        let d = DecisionEngine::new(&NullNotifier)
            .with_resolver(&clone)
            .decide("db2:3306", &classification, &policy, RecoveryOperation::Join)
            .unwrap();
        assert_eq!(d.method, RecoveryMethod::FullStateTransfer);
        assert!(d.diverged);

        let abort = FixedResolver(None);
        let err = DecisionEngine::new(&NullNotifier)
            .with_resolver(&abort)
            .decide("db2:3306", &classification, &policy, RecoveryOperation::Join)
            .unwrap_err();
        assert!(matches!(err, Error::RecoveryAborted { .. }));

        // incremental is never offered for diverged targets
        let incr = FixedResolver(Some(RecoveryMethod::Incremental));
        let err = DecisionEngine::new(&NullNotifier)
            .with_resolver(&incr)
            .decide("db2:3306", &classification, &policy, RecoveryOperation::Join)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryMethod { .. }));
    }

    #[test]
    fn test_for_versions() {
        let ok = RecoveryPolicy::for_versions(Version::new(8, 0, 36), Version::new(8, 0, 36));
        assert!(ok.full_transfer_available());
        let old = RecoveryPolicy::for_versions(Version::new(8, 0, 16), Version::new(8, 0, 16));
        assert!(!old.full_transfer_available());
    }

    #[test]
    fn test_incremental_safety_table() {
        use TransactionSetRelation::*;
        assert_eq!(incremental_safety(Identical, false), (true, true));
        assert_eq!(incremental_safety(New, false), (true, false));
        assert_eq!(incremental_safety(New, true), (true, true));
        assert_eq!(incremental_safety(Irrecoverable, true), (false, false));
        assert_eq!(incremental_safety(Diverged, true), (false, false));
    }
}
