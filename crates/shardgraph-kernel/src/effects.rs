//! Effects produced by the engine.
//!
//! Masters and replicas are independent value copies owned by their
//! partitions. Keeping them in sync is an explicit multi-target write, and
//! every such write is recorded here together with the partitions the delta
//! was re-applied to.

use serde::{Deserialize, Serialize};
use shardgraph_types::{PartitionId, UserId};

/// A placement change performed by an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    // ========================================================================
    // Partition lifecycle
    // ========================================================================
    /// A new, empty partition exists.
    PartitionAdded(PartitionId),

    /// A partition and every reference to it are gone.
    PartitionRemoved(PartitionId),

    // ========================================================================
    // Masters
    // ========================================================================
    /// A new user's master was placed.
    MasterPlaced {
        user: UserId,
        partition: PartitionId,
    },

    /// A user's master was deleted.
    MasterRemoved {
        user: UserId,
        partition: PartitionId,
    },

    /// A master moved between partitions.
    MasterMoved {
        user: UserId,
        from: PartitionId,
        to: PartitionId,
        /// Copies whose master pointer was rewritten.
        locations: Vec<PartitionId>,
    },

    /// A replica took over as master.
    ReplicaPromoted {
        user: UserId,
        /// Former master partition.
        from: PartitionId,
        /// Partition of the promoted replica.
        to: PartitionId,
        locations: Vec<PartitionId>,
    },

    // ========================================================================
    // Replicas
    // ========================================================================
    /// A replica was created.
    ReplicaAdded {
        user: UserId,
        partition: PartitionId,
        /// Copies whose replica set was rewritten (including the new one).
        locations: Vec<PartitionId>,
    },

    /// A replica was destroyed.
    ReplicaRemoved {
        user: UserId,
        partition: PartitionId,
        locations: Vec<PartitionId>,
    },

    // ========================================================================
    // Friendships
    // ========================================================================
    /// `friend` was added to every copy of `user`.
    FriendshipAdded {
        user: UserId,
        friend: UserId,
        locations: Vec<PartitionId>,
    },

    /// `friend` was removed from every copy of `user`.
    FriendshipRemoved {
        user: UserId,
        friend: UserId,
        locations: Vec<PartitionId>,
    },
}

impl Effect {
    /// Net change this effect makes to the total replica count.
    pub fn replica_delta(&self) -> isize {
        match self {
            Effect::ReplicaAdded { .. } => 1,
            Effect::ReplicaRemoved { .. } | Effect::ReplicaPromoted { .. } => -1,
            _ => 0,
        }
    }
}

/// Sums [`Effect::replica_delta`] over a batch of effects.
pub fn net_replica_delta(effects: &[Effect]) -> isize {
    effects.iter().map(Effect::replica_delta).sum()
}
