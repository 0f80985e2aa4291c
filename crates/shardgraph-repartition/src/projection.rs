//! Logical projection of the graph state.
//!
//! Searches never touch the physical state. They work on this lightweight
//! copy: the friendship map (shared, read-only), the master assignment and,
//! for replica-aware searches, one replica set per user. Partition loads are
//! maintained incrementally so balance checks are cheap.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use shardgraph_kernel::GraphState;
use shardgraph_types::{Assignment, FriendshipMap, PartitionId, UserId};

use crate::scratch::ReplicaChanges;

/// Replica set per user.
pub type ReplicaSets = BTreeMap<UserId, BTreeSet<PartitionId>>;

static NO_FRIENDS: BTreeSet<UserId> = BTreeSet::new();
static NO_REPLICAS: BTreeSet<PartitionId> = BTreeSet::new();

/// Master assignment, partition loads and (optionally) replica sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalProjection {
    friendships: Arc<FriendshipMap>,
    assignment: Assignment,
    loads: BTreeMap<PartitionId, usize>,
    replicas: Option<ReplicaSets>,
    replica_loads: BTreeMap<PartitionId, usize>,
    min_num_replicas: usize,
}

impl LogicalProjection {
    /// Projects masters and friendships only.
    pub fn from_state(state: &GraphState) -> Self {
        let loads = state
            .partitions()
            .map(|p| (p.id(), p.master_count()))
            .collect();
        Self {
            friendships: Arc::new(state.friendships_map()),
            assignment: state.assignment(),
            loads,
            replicas: None,
            replica_loads: BTreeMap::new(),
            min_num_replicas: state.min_num_replicas(),
        }
    }

    /// Projects masters, friendships and replica sets.
    pub fn with_replicas(state: &GraphState) -> Self {
        let mut projection = Self::from_state(state);
        projection.replica_loads = state
            .partitions()
            .map(|p| (p.id(), p.replica_count()))
            .collect();
        projection.replicas = Some(state.replica_sets());
        projection
    }

    /// Builds a projection from raw maps. Users missing from `assignment`
    /// are ignored; every partition in `partitions` exists even if empty.
    pub fn from_parts(
        friendships: FriendshipMap,
        assignment: Assignment,
        partitions: &[PartitionId],
        replicas: Option<ReplicaSets>,
        min_num_replicas: usize,
    ) -> Self {
        let mut loads: BTreeMap<PartitionId, usize> =
            partitions.iter().map(|p| (*p, 0)).collect();
        for pid in assignment.values() {
            *loads.entry(*pid).or_default() += 1;
        }
        let mut replica_loads: BTreeMap<PartitionId, usize> = BTreeMap::new();
        if let Some(sets) = &replicas {
            replica_loads = partitions.iter().map(|p| (*p, 0)).collect();
            for pid in sets.values().flatten() {
                *replica_loads.entry(*pid).or_default() += 1;
            }
        }
        Self {
            friendships: Arc::new(friendships),
            assignment,
            loads,
            replicas,
            replica_loads,
            min_num_replicas,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn min_num_replicas(&self) -> usize {
        self.min_num_replicas
    }

    pub fn tracks_replicas(&self) -> bool {
        self.replicas.is_some()
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn replica_sets(&self) -> Option<&ReplicaSets> {
        self.replicas.as_ref()
    }

    pub fn friendships(&self) -> &FriendshipMap {
        &self.friendships
    }

    pub fn partition_of(&self, user: UserId) -> Option<PartitionId> {
        self.assignment.get(&user).copied()
    }

    pub fn friends(&self, user: UserId) -> &BTreeSet<UserId> {
        self.friendships.get(&user).unwrap_or(&NO_FRIENDS)
    }

    pub fn are_friends(&self, a: UserId, b: UserId) -> bool {
        self.friends(a).contains(&b)
    }

    /// Replica partitions of `user`; empty when replicas are not tracked.
    pub fn replicas_of(&self, user: UserId) -> &BTreeSet<PartitionId> {
        self.replicas
            .as_ref()
            .and_then(|sets| sets.get(&user))
            .unwrap_or(&NO_REPLICAS)
    }

    /// Users in ascending id order.
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.assignment.keys().copied()
    }

    pub fn user_count(&self) -> usize {
        self.assignment.len()
    }

    /// Partition ids in ascending order.
    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.loads.keys().copied()
    }

    pub fn partition_count(&self) -> usize {
        self.loads.len()
    }

    /// Masters per partition.
    pub fn loads(&self) -> &BTreeMap<PartitionId, usize> {
        &self.loads
    }

    pub fn load(&self, pid: PartitionId) -> usize {
        self.loads.get(&pid).copied().unwrap_or(0)
    }

    /// Replicas held by `pid` (zero when replicas are not tracked).
    pub fn replica_load(&self, pid: PartitionId) -> usize {
        self.replica_loads.get(&pid).copied().unwrap_or(0)
    }

    /// Mean number of masters per partition.
    pub fn average_load(&self) -> f64 {
        if self.loads.is_empty() {
            return 0.0;
        }
        self.user_count() as f64 / self.partition_count() as f64
    }

    /// Number of friends of `user` mastered on `pid`.
    pub fn friends_on(&self, user: UserId, pid: PartitionId) -> usize {
        self.friends(user)
            .iter()
            .filter(|f| self.partition_of(**f) == Some(pid))
            .count()
    }

    pub fn edge_cut(&self) -> usize {
        shardgraph_types::edge_cut(&self.friendships, &self.assignment)
    }

    pub fn replica_count(&self) -> usize {
        self.replica_loads.values().sum()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Moves the master of `user` without touching replicas.
    pub fn set_master(&mut self, user: UserId, to: PartitionId) {
        let Some(from) = self.assignment.insert(user, to) else {
            return;
        };
        if let Some(load) = self.loads.get_mut(&from) {
            *load = load.saturating_sub(1);
        }
        *self.loads.entry(to).or_default() += 1;
    }

    /// Exchanges the masters of `a` and `b` without touching replicas.
    pub fn swap_masters(&mut self, a: UserId, b: UserId) {
        if let (Some(pa), Some(pb)) = (self.partition_of(a), self.partition_of(b)) {
            self.set_master(a, pb);
            self.set_master(b, pa);
        }
    }

    /// Applies the master moves and replica changes computed on a scratch
    /// overlay.
    pub fn apply_changes(&mut self, changes: &ReplicaChanges) {
        for (user, to) in &changes.masters {
            self.set_master(*user, *to);
        }
        let Some(sets) = self.replicas.as_mut() else {
            return;
        };
        for (user, pid) in &changes.removed {
            if sets.get_mut(user).is_some_and(|s| s.remove(pid))
                && let Some(load) = self.replica_loads.get_mut(pid)
            {
                *load = load.saturating_sub(1);
            }
        }
        for (user, pid) in &changes.added {
            if sets.entry(*user).or_default().insert(*pid) {
                *self.replica_loads.entry(*pid).or_default() += 1;
            }
        }
    }
}
