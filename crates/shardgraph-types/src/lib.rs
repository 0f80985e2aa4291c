//! # shardgraph-types: Core types for `shardgraph`
//!
//! This crate contains the identifiers shared across the workspace:
//! - Entity IDs ([`UserId`], [`PartitionId`])
//! - Plain boundary maps ([`MasterMap`], [`ReplicaMap`], [`FriendshipMap`])
//!
//! The boundary maps are the serialization-agnostic way in and out of the
//! engine. Ordered collections are used everywhere so that iteration order,
//! and therefore every tie-break built on top of it, is deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap values)
// ============================================================================

/// Unique identifier for a user of the social graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Identifier of a logical shard.
///
/// Partitions are not machines; they are logical shard identifiers that
/// own a set of masters and a set of replicas.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the identifier that follows this one.
    ///
    /// # Panics
    ///
    /// Panics if the identifier space is exhausted.
    pub fn next(self) -> Self {
        Self(
            self.0
                .checked_add(1)
                .expect("partition id space exhausted"),
        )
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<PartitionId> for u32 {
    fn from(id: PartitionId) -> Self {
        id.0
    }
}

// ============================================================================
// Boundary maps
// ============================================================================

/// Partition id → ids of the masters it holds.
pub type MasterMap = BTreeMap<PartitionId, BTreeSet<UserId>>;

/// Partition id → ids of the replicas it holds.
pub type ReplicaMap = BTreeMap<PartitionId, BTreeSet<UserId>>;

/// User id → ids of that user's friends.
pub type FriendshipMap = BTreeMap<UserId, BTreeSet<UserId>>;

/// User id → partition holding that user's master.
pub type Assignment = BTreeMap<UserId, PartitionId>;

/// Counts the undirected edges of a friendship map whose endpoints sit on
/// different partitions of `assignment`.
///
/// Users missing from `assignment` are ignored.
pub fn edge_cut(friendships: &FriendshipMap, assignment: &Assignment) -> usize {
    let mut cut = 0;
    for (user, friends) in friendships {
        let Some(home) = assignment.get(user) else {
            continue;
        };
        for friend in friends.range((std::ops::Bound::Excluded(*user), std::ops::Bound::Unbounded))
        {
            if let Some(other) = assignment.get(friend)
                && other != home
            {
                cut += 1;
            }
        }
    }
    cut
}
