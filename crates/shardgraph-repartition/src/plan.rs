//! Plans produced by the searches.

use serde::{Deserialize, Serialize};
use shardgraph_types::{Assignment, PartitionId, UserId};

use crate::projection::{LogicalProjection, ReplicaSets};

/// One master relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Move {
    pub user: UserId,
    pub from: PartitionId,
    pub to: PartitionId,
}

/// Target configuration a search converged on.
///
/// The master assignment is always present; replica-aware searches also
/// carry the target replica set of every user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalPlan {
    before: Assignment,
    after: Assignment,
    replicas: Option<ReplicaSets>,
}

impl LogicalPlan {
    /// A plan that changes nothing.
    pub fn unchanged(projection: &LogicalProjection) -> Self {
        Self::diff(projection, projection)
    }

    /// The plan that turns `before` into `after`.
    pub fn diff(before: &LogicalProjection, after: &LogicalProjection) -> Self {
        Self {
            before: before.assignment().clone(),
            after: after.assignment().clone(),
            replicas: after.replica_sets().cloned(),
        }
    }

    /// A plan from a bare target assignment. Users absent from `after` stay
    /// where they are.
    pub fn from_assignment(before: Assignment, mut after: Assignment) -> Self {
        for (user, pid) in &before {
            after.entry(*user).or_insert(*pid);
        }
        after.retain(|user, _| before.contains_key(user));
        Self {
            before,
            after,
            replicas: None,
        }
    }

    /// Master relocations in ascending user order.
    pub fn moves(&self) -> Vec<Move> {
        self.after
            .iter()
            .filter_map(|(user, to)| {
                let from = *self.before.get(user)?;
                (from != *to).then_some(Move {
                    user: *user,
                    from,
                    to: *to,
                })
            })
            .collect()
    }

    pub fn move_count(&self) -> usize {
        self.moves().len()
    }

    /// Returns true if the plan relocates no master and carries no replica
    /// targets.
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.before == self.after
    }

    pub fn target_assignment(&self) -> &Assignment {
        &self.after
    }

    pub fn target_replicas(&self) -> Option<&ReplicaSets> {
        self.replicas.as_ref()
    }
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// A round or sweep found nothing left to do.
    Converged,
    /// The iteration cap or temperature schedule ran out first. The plan is
    /// still the best one found.
    Exhausted,
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub plan: LogicalPlan,
    /// Local-search rounds or annealing sweeps performed.
    pub rounds: usize,
    pub termination: Termination,
    pub initial_cost: usize,
    pub final_cost: usize,
}
