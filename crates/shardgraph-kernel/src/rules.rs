//! Replica eligibility rules.
//!
//! These are the single source of truth for when a replica must exist and
//! when it may go. The engine applies them, the befriending policy prices
//! moves with them, and the repartitioner mirrors them on its logical
//! projection.
//!
//! - A replica of `f` on `p` is *needed* iff some master on `p` is a friend
//!   of `f`.
//! - A replica may be *removed* iff it is not needed and `f` keeps more than
//!   `min_num_replicas` replicas.
//! - A master leaving `p` leaves a replica behind iff it still has a friend
//!   mastered on `p`.

use std::collections::BTreeSet;

use shardgraph_types::{PartitionId, UserId};

use crate::state::GraphState;

/// Returns true if some friend of `user` other than `excluding` is mastered
/// on `pid`.
pub fn has_friend_mastered_on(
    state: &GraphState,
    user: UserId,
    pid: PartitionId,
    excluding: Option<UserId>,
) -> bool {
    state.friends_of(user).is_some_and(|friends| {
        friends
            .iter()
            .any(|f| Some(*f) != excluding && state.master_partition_of(*f) == Some(pid))
    })
}

/// Returns true if the replica of `user` on `pid` serves friend locality.
pub fn replica_needed(state: &GraphState, user: UserId, pid: PartitionId) -> bool {
    has_friend_mastered_on(state, user, pid, None)
}

/// Returns true if the replica of `user` on `pid` exists and may be deleted.
pub fn replica_removable(state: &GraphState, user: UserId, pid: PartitionId) -> bool {
    state.has_replica(user, pid)
        && !replica_needed(state, user, pid)
        && state.replica_count_of(user) > state.min_num_replicas()
}

/// The replica changes that relocating one master implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub user: UserId,
    pub from: PartitionId,
    pub to: PartitionId,
    /// Friends of the mover that need a new replica on `to`.
    pub replicate_at_dest: BTreeSet<UserId>,
    /// The mover leaves a replica on `from` for friends still mastered there.
    pub keep_replica_at_source: bool,
    /// The mover's existing replica on `to` becomes redundant.
    pub drop_replica_at_dest: bool,
    /// Dropping that replica would break the floor, so one is added elsewhere.
    pub needs_compensation: bool,
    /// Friends whose replica on `from` existed only for the mover.
    pub delete_at_source: BTreeSet<UserId>,
}

impl MovePlan {
    /// Net change in the total replica count if this plan is executed.
    pub fn replica_delta(&self) -> isize {
        let added = self.replicate_at_dest.len()
            + usize::from(self.keep_replica_at_source)
            + usize::from(self.needs_compensation);
        let removed = self.delete_at_source.len() + usize::from(self.drop_replica_at_dest);
        added as isize - removed as isize
    }
}

/// Computes the replica changes of moving `user`'s master to `to`.
///
/// Returns `None` for an unknown user. The plan follows the order in which
/// [`crate::Engine::move_user`] performs its steps, so counts seen by later
/// steps include the replicas added by earlier ones.
pub fn plan_move(state: &GraphState, user: UserId, to: PartitionId) -> Option<MovePlan> {
    let from = state.master_partition_of(user)?;
    let friends = state.friends_of(user)?;
    let min = state.min_num_replicas();

    let replicate_at_dest: BTreeSet<UserId> = friends
        .iter()
        .copied()
        .filter(|f| !state.is_present(*f, to))
        .collect();

    let keep_replica_at_source = from != to && has_friend_mastered_on(state, user, from, None);
    let drop_replica_at_dest = state.has_replica(user, to);
    let count_before_drop = state.replica_count_of(user) + usize::from(keep_replica_at_source);
    let needs_compensation = drop_replica_at_dest && count_before_drop <= min;

    let delete_at_source: BTreeSet<UserId> = friends
        .iter()
        .copied()
        .filter(|f| {
            let count = state.replica_count_of(*f) + usize::from(replicate_at_dest.contains(f));
            state.has_replica(*f, from)
                && !has_friend_mastered_on(state, *f, from, Some(user))
                && count > min
        })
        .collect();

    Some(MovePlan {
        user,
        from,
        to,
        replicate_at_dest,
        keep_replica_at_source,
        drop_replica_at_dest,
        needs_compensation,
        delete_at_source,
    })
}
