//! Befriending policy.
//!
//! When two users mastered on different partitions become friends, friend
//! locality can be restored either by cross-replicating them or by moving
//! one master next to the other. The policy prices the three outcomes by
//! the total replica count each would leave behind.

use serde::{Deserialize, Serialize};
use shardgraph_types::UserId;

use crate::rules;
use crate::state::GraphState;

/// Outcome of a befriending decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BefriendDecision {
    /// Keep both masters; cross-replicate where needed.
    NoChange,
    /// Move the master of the smaller id to the larger id's partition.
    MoveUToV,
    /// Move the master of the larger id to the smaller id's partition.
    MoveVToU,
}

/// Decides how to restore friend locality for a new cross-partition edge.
pub trait BefriendingPolicy {
    /// Called after the edge `u`-`v` has been recorded, with `u < v` and the
    /// two masters on different partitions.
    fn decide(&self, state: &GraphState, u: UserId, v: UserId) -> BefriendDecision;
}

/// Projected total replica count for each befriending outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaProjection {
    pub stay: usize,
    pub move_u_to_v: usize,
    pub move_v_to_u: usize,
}

/// Picks the outcome with the lowest projected replica count.
///
/// Ties prefer [`BefriendDecision::NoChange`]. When both moves tie, the user
/// whose partition holds more masters moves, which nudges load toward
/// balance; on a full tie the smaller id moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparBefriendingPolicy;

impl SparBefriendingPolicy {
    /// Projects the replica count under every outcome.
    ///
    /// Returns `None` if either user is unknown.
    pub fn project(&self, state: &GraphState, u: UserId, v: UserId) -> Option<ReplicaProjection> {
        let pu = state.master_partition_of(u)?;
        let pv = state.master_partition_of(v)?;
        let current = state.replica_count();

        let stay = current
            + usize::from(!state.is_present(u, pv))
            + usize::from(!state.is_present(v, pu));

        let after_move = |mover: UserId, to| {
            rules::plan_move(state, mover, to)
                .map(|plan| current.saturating_add_signed(plan.replica_delta()))
        };

        Some(ReplicaProjection {
            stay,
            move_u_to_v: after_move(u, pv)?,
            move_v_to_u: after_move(v, pu)?,
        })
    }
}

impl BefriendingPolicy for SparBefriendingPolicy {
    fn decide(&self, state: &GraphState, u: UserId, v: UserId) -> BefriendDecision {
        let Some(projection) = self.project(state, u, v) else {
            return BefriendDecision::NoChange;
        };
        let ReplicaProjection {
            stay,
            move_u_to_v,
            move_v_to_u,
        } = projection;

        if stay <= move_u_to_v && stay <= move_v_to_u {
            return BefriendDecision::NoChange;
        }
        if move_u_to_v != move_v_to_u {
            return if move_u_to_v < move_v_to_u {
                BefriendDecision::MoveUToV
            } else {
                BefriendDecision::MoveVToU
            };
        }

        let load = |user| {
            state
                .master_partition_of(user)
                .map_or(0, |pid| state.master_count(pid))
        };
        if load(v) > load(u) {
            BefriendDecision::MoveVToU
        } else {
            BefriendDecision::MoveUToV
        }
    }
}

/// Never moves a master; always cross-replicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicateOnlyPolicy;

impl BefriendingPolicy for ReplicateOnlyPolicy {
    fn decide(&self, _state: &GraphState, _u: UserId, _v: UserId) -> BefriendDecision {
        BefriendDecision::NoChange
    }
}
