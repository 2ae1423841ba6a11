//! Transaction-set compatibility classifier
//!
//! Compares a target's executed transactions against a donor's and decides
//! how the two histories relate. Results are computed fresh on every call:
//! both servers keep committing and purging, so a classification is only
//! valid for the instant it was read and must never be cached.
//!
//! ## Algorithm
//!
//! With `D` the donor's executed set, `P` the donor's purged set and `T`
//! the target's executed set:
//!
//! 1. `T \ D` non-empty → `Diverged` (the difference is the errant set)
//! 2. `(D \ T) ∩ P` non-empty → transactions the target needs are gone from
//!    the donor's logs. Another member may still have them, so the topology
//!    is asked; the first member that holds all of them ends the search.
//!    None found → `Irrecoverable`
//! 3. `T` empty → `New`, `T == D` → `Identical`, else `RecoverableSubset`

use catchup_core::{
    Instance, Notification, Notifier, Result, Topology, TransactionSet, TransactionSetRelation,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Result of comparing a target with a donor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// How the histories relate
    pub relation: TransactionSetRelation,
    /// Transactions on the target that the donor never executed
    pub errant: TransactionSet,
    /// Transactions the target lacks that the donor has purged
    pub missing_purged: TransactionSet,
    /// Whether the target has executed nothing at all
    pub target_history_empty: bool,
}

impl Classification {
    /// Classification carrying only a relation
    ///
    /// The target history is taken to be empty exactly for `New`.
    pub fn from_relation(relation: TransactionSetRelation) -> Self {
        Classification {
            relation,
            errant: TransactionSet::new(),
            missing_purged: TransactionSet::new(),
            target_history_empty: relation == TransactionSetRelation::New,
        }
    }
}

/// Compare transaction sets without consulting other members
///
/// Any needed-but-purged transaction makes the result `Irrecoverable`;
/// [`classify`] refines that with the topology.
pub fn compare_sets(
    donor_executed: &TransactionSet,
    donor_purged: &TransactionSet,
    target_executed: &TransactionSet,
) -> Classification {
    let errant = target_executed.difference(donor_executed);
    let missing_purged = donor_executed
        .difference(target_executed)
        .intersection(donor_purged);
    let target_history_empty = target_executed.is_empty();

    let relation = if !errant.is_empty() {
        TransactionSetRelation::Diverged
    } else if !missing_purged.is_empty() {
        TransactionSetRelation::Irrecoverable
    } else {
        relation_ignoring_purge(donor_executed, target_executed)
    };

    Classification {
        relation,
        errant,
        missing_purged,
        target_history_empty,
    }
}

fn relation_ignoring_purge(
    donor_executed: &TransactionSet,
    target_executed: &TransactionSet,
) -> TransactionSetRelation {
    if target_executed.is_empty() {
        TransactionSetRelation::New
    } else if target_executed == donor_executed {
        TransactionSetRelation::Identical
    } else {
        TransactionSetRelation::RecoverableSubset
    }
}

/// Classify `target` against `donor`
///
/// `topology` is only consulted when the donor purged transactions the
/// target needs. Pass `None` to skip the cluster-wide check.
pub fn classify(
    donor: &dyn Instance,
    target: &dyn Instance,
    topology: Option<&dyn Topology>,
    notifier: &dyn Notifier,
) -> Result<Classification> {
    let donor_executed = donor.gtid_executed()?;
    let donor_purged = donor.gtid_purged()?;
    let target_executed = target.gtid_executed()?;

    let mut classification = compare_sets(&donor_executed, &donor_purged, &target_executed);
    debug!(
        target: "catchup::classify",
        donor = donor.endpoint(),
        endpoint = target.endpoint(),
        relation = %classification.relation,
        "Compared transaction sets"
    );

    if classification.relation == TransactionSetRelation::Irrecoverable {
        if let Some(topology) = topology {
            if member_holds_transactions(topology, &classification.missing_purged)? {
                classification.relation =
                    relation_ignoring_purge(&donor_executed, &target_executed);
                info!(
                    target: "catchup::classify",
                    endpoint = target.endpoint(),
                    relation = %classification.relation,
                    "Purged transactions still available on another member"
                );
            }
        }
    }

    match classification.relation {
        TransactionSetRelation::Diverged => notifier.notify(&Notification::ErrantTransactions {
            target: target.endpoint().to_string(),
            errant: classification.errant.clone(),
        }),
        TransactionSetRelation::Irrecoverable => {
            notifier.notify(&Notification::PurgedTransactionsMissing {
                target: target.endpoint().to_string(),
                missing: classification.missing_purged.clone(),
            })
        }
        _ => {}
    }

    Ok(classification)
}

/// Whether some reachable member still holds every transaction in `needed`
///
/// Stops at the first member that does.
pub fn member_holds_transactions(topology: &dyn Topology, needed: &TransactionSet) -> Result<bool> {
    topology.any_member(&mut |member: &dyn Instance| -> Result<bool> {
        let executed = member.gtid_executed()?;
        if !needed.is_subset(&executed) {
            return Ok(false);
        }
        let purged = member.gtid_purged()?;
        let usable = purged.intersection(needed).is_empty();
        debug!(
            target: "catchup::classify",
            member = member.endpoint(),
            usable,
            "Checked member for purged transactions"
        );
        Ok(usable)
    })
}
