//! Graph state.
//!
//! Each partition exclusively owns value copies of the users it holds, one
//! map for masters and one for replicas. A global index maps every user to
//! the partition holding its master. Nothing is shared between copies:
//! keeping replicas in step with their master is the job of
//! [`GraphState::update_copies`], which re-applies a delta to every copy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use shardgraph_types::{Assignment, FriendshipMap, MasterMap, PartitionId, ReplicaMap, UserId};

use crate::error::KernelError;
use crate::invariants;

// ============================================================================
// User copies
// ============================================================================

/// One copy of a user, either its master or one of its replicas.
///
/// All copies of a user carry identical fields; the partition that owns a
/// copy is what distinguishes a master from a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCopy {
    pub id: UserId,
    pub friends: BTreeSet<UserId>,
    pub master_partition: PartitionId,
    pub replica_partitions: BTreeSet<PartitionId>,
}

impl UserCopy {
    /// Creates a friendless copy mastered on `master_partition`.
    pub fn new(id: UserId, master_partition: PartitionId) -> Self {
        Self {
            id,
            friends: BTreeSet::new(),
            master_partition,
            replica_partitions: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Partitions
// ============================================================================

/// A logical shard holding masters and replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    id: PartitionId,
    masters: BTreeMap<UserId, UserCopy>,
    replicas: BTreeMap<UserId, UserCopy>,
}

impl Partition {
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            masters: BTreeMap::new(),
            replicas: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Masters held by this partition, keyed by user id.
    pub fn masters(&self) -> &BTreeMap<UserId, UserCopy> {
        &self.masters
    }

    /// Replicas held by this partition, keyed by user id.
    pub fn replicas(&self) -> &BTreeMap<UserId, UserCopy> {
        &self.replicas
    }

    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Splits the partition into its master and replica maps.
    pub(crate) fn into_parts(self) -> (BTreeMap<UserId, UserCopy>, BTreeMap<UserId, UserCopy>) {
        (self.masters, self.replicas)
    }

    /// Returns true if the partition holds a master or a replica of `user`.
    pub fn holds(&self, user: UserId) -> bool {
        self.masters.contains_key(&user) || self.replicas.contains_key(&user)
    }
}

// ============================================================================
// Graph state
// ============================================================================

/// The sharded social graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphState {
    min_num_replicas: usize,
    partitions: BTreeMap<PartitionId, Partition>,
    user_index: BTreeMap<UserId, PartitionId>,
}

impl GraphState {
    /// Creates an empty state with no partitions.
    pub fn new(min_num_replicas: usize) -> Self {
        Self {
            min_num_replicas,
            partitions: BTreeMap::new(),
            user_index: BTreeMap::new(),
        }
    }

    /// Builds a state from plain boundary maps.
    ///
    /// Every user must be mastered exactly once, friendships must be
    /// symmetric, and the result must satisfy all placement invariants.
    pub fn from_maps(
        min_num_replicas: usize,
        masters: &MasterMap,
        replicas: &ReplicaMap,
        friendships: &FriendshipMap,
    ) -> Result<Self, KernelError> {
        let mut state = Self::new(min_num_replicas);
        for pid in masters.keys().chain(replicas.keys()) {
            state
                .partitions
                .entry(*pid)
                .or_insert_with(|| Partition::new(*pid));
        }

        for (pid, users) in masters {
            for user in users {
                if let Some(other) = state.user_index.insert(*user, *pid) {
                    return Err(KernelError::InconsistentInput(format!(
                        "user {user} is mastered on both {other} and {pid}"
                    )));
                }
            }
        }

        let mut replica_sets: BTreeMap<UserId, BTreeSet<PartitionId>> = BTreeMap::new();
        for (pid, users) in replicas {
            for user in users {
                if !state.user_index.contains_key(user) {
                    return Err(KernelError::InconsistentInput(format!(
                        "replica of user {user} on {pid} has no master"
                    )));
                }
                replica_sets.entry(*user).or_default().insert(*pid);
            }
        }

        for (user, friends) in friendships {
            if !state.user_index.contains_key(user) {
                return Err(KernelError::InconsistentInput(format!(
                    "friendship of unknown user {user}"
                )));
            }
            for friend in friends {
                if friend == user {
                    return Err(KernelError::InconsistentInput(format!(
                        "user {user} is listed as its own friend"
                    )));
                }
                let symmetric = friendships
                    .get(friend)
                    .is_some_and(|back| back.contains(user));
                if !symmetric {
                    return Err(KernelError::InconsistentInput(format!(
                        "friendship {user}-{friend} is not symmetric"
                    )));
                }
            }
        }

        let index: Vec<(UserId, PartitionId)> =
            state.user_index.iter().map(|(u, p)| (*u, *p)).collect();
        for (user, master_pid) in index {
            let replica_partitions = replica_sets.remove(&user).unwrap_or_default();
            if replica_partitions.contains(&master_pid) {
                return Err(KernelError::InconsistentInput(format!(
                    "user {user} has a master and a replica on {master_pid}"
                )));
            }
            let copy = UserCopy {
                id: user,
                friends: friendships.get(&user).cloned().unwrap_or_default(),
                master_partition: master_pid,
                replica_partitions,
            };
            for pid in &copy.replica_partitions {
                state.insert_replica(*pid, copy.clone());
            }
            state.insert_master(copy);
        }

        invariants::check(&state).map_err(|v| KernelError::InconsistentInput(v.to_string()))?;
        Ok(state)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn min_num_replicas(&self) -> usize {
        self.min_num_replicas
    }

    pub fn partition(&self, pid: PartitionId) -> Option<&Partition> {
        self.partitions.get(&pid)
    }

    pub fn partition_exists(&self, pid: PartitionId) -> bool {
        self.partitions.contains_key(&pid)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Partition ids in ascending order.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn user_exists(&self, user: UserId) -> bool {
        self.user_index.contains_key(&user)
    }

    pub fn user_count(&self) -> usize {
        self.user_index.len()
    }

    /// Users with their master partition, in ascending user order.
    pub fn users(&self) -> impl Iterator<Item = (UserId, PartitionId)> + '_ {
        self.user_index.iter().map(|(u, p)| (*u, *p))
    }

    pub fn master_partition_of(&self, user: UserId) -> Option<PartitionId> {
        self.user_index.get(&user).copied()
    }

    /// Returns the master copy of a user.
    pub fn master(&self, user: UserId) -> Option<&UserCopy> {
        let pid = self.user_index.get(&user)?;
        self.partitions.get(pid)?.masters.get(&user)
    }

    /// Returns the replica of `user` held by `pid`.
    pub fn replica(&self, user: UserId, pid: PartitionId) -> Option<&UserCopy> {
        self.partitions.get(&pid)?.replicas.get(&user)
    }

    pub fn friends_of(&self, user: UserId) -> Option<&BTreeSet<UserId>> {
        self.master(user).map(|copy| &copy.friends)
    }

    pub fn replica_partitions_of(&self, user: UserId) -> Option<&BTreeSet<PartitionId>> {
        self.master(user).map(|copy| &copy.replica_partitions)
    }

    /// Number of replicas of `user` (zero for unknown users).
    pub fn replica_count_of(&self, user: UserId) -> usize {
        self.replica_partitions_of(user).map_or(0, BTreeSet::len)
    }

    pub fn has_replica(&self, user: UserId, pid: PartitionId) -> bool {
        self.partitions
            .get(&pid)
            .is_some_and(|p| p.replicas.contains_key(&user))
    }

    /// Returns true if `pid` holds a master or a replica of `user`.
    pub fn is_present(&self, user: UserId, pid: PartitionId) -> bool {
        self.partitions.get(&pid).is_some_and(|p| p.holds(user))
    }

    pub fn are_friends(&self, a: UserId, b: UserId) -> bool {
        self.friends_of(a).is_some_and(|f| f.contains(&b))
    }

    /// Number of masters on `pid` (zero for unknown partitions).
    pub fn master_count(&self, pid: PartitionId) -> usize {
        self.partitions.get(&pid).map_or(0, Partition::master_count)
    }

    /// Number of friendships whose endpoints are mastered on different
    /// partitions.
    pub fn edge_cut(&self) -> usize {
        shardgraph_types::edge_cut(&self.friendships_map(), &self.assignment())
    }

    /// Total number of replicas across all partitions.
    pub fn replica_count(&self) -> usize {
        self.partitions.values().map(Partition::replica_count).sum()
    }

    /// Number of friendships.
    pub fn friendship_count(&self) -> usize {
        self.user_index
            .keys()
            .filter_map(|u| self.friends_of(*u))
            .map(BTreeSet::len)
            .sum::<usize>()
            / 2
    }

    // ========================================================================
    // Boundary exports
    // ========================================================================

    pub fn masters_map(&self) -> MasterMap {
        self.partitions
            .iter()
            .map(|(pid, p)| (*pid, p.masters.keys().copied().collect()))
            .collect()
    }

    pub fn replicas_map(&self) -> ReplicaMap {
        self.partitions
            .iter()
            .map(|(pid, p)| (*pid, p.replicas.keys().copied().collect()))
            .collect()
    }

    pub fn friendships_map(&self) -> FriendshipMap {
        self.user_index
            .keys()
            .filter_map(|u| self.master(*u).map(|copy| (*u, copy.friends.clone())))
            .collect()
    }

    /// User → master partition.
    pub fn assignment(&self) -> Assignment {
        self.user_index.clone()
    }

    /// User → replica partitions.
    pub fn replica_sets(&self) -> BTreeMap<UserId, BTreeSet<PartitionId>> {
        self.user_index
            .keys()
            .filter_map(|u| {
                self.master(*u)
                    .map(|copy| (*u, copy.replica_partitions.clone()))
            })
            .collect()
    }

    // ========================================================================
    // Raw mutation (internal to the kernel)
    // ========================================================================

    pub(crate) fn insert_partition(&mut self, pid: PartitionId) {
        self.partitions.insert(pid, Partition::new(pid));
    }

    pub(crate) fn take_partition(&mut self, pid: PartitionId) -> Option<Partition> {
        self.partitions.remove(&pid)
    }

    /// Stores a master copy on its `master_partition` and indexes it.
    pub(crate) fn insert_master(&mut self, copy: UserCopy) {
        let pid = copy.master_partition;
        self.user_index.insert(copy.id, pid);
        if let Some(partition) = self.partitions.get_mut(&pid) {
            partition.masters.insert(copy.id, copy);
        }
    }

    /// Removes a master copy and its index entry.
    pub(crate) fn take_master(&mut self, user: UserId) -> Option<UserCopy> {
        let pid = self.user_index.remove(&user)?;
        self.partitions.get_mut(&pid)?.masters.remove(&user)
    }

    pub(crate) fn insert_replica(&mut self, pid: PartitionId, copy: UserCopy) {
        if let Some(partition) = self.partitions.get_mut(&pid) {
            partition.replicas.insert(copy.id, copy);
        }
    }

    pub(crate) fn take_replica(&mut self, user: UserId, pid: PartitionId) -> Option<UserCopy> {
        self.partitions.get_mut(&pid)?.replicas.remove(&user)
    }

    /// Re-applies `delta` to the master of `user` and then to every replica
    /// listed in the master's (updated) replica set.
    ///
    /// Returns the partitions whose copy was rewritten, master first.
    pub(crate) fn update_copies<F>(&mut self, user: UserId, mut delta: F) -> Vec<PartitionId>
    where
        F: FnMut(&mut UserCopy),
    {
        let Some(master_pid) = self.user_index.get(&user).copied() else {
            return Vec::new();
        };
        let Some(master) = self
            .partitions
            .get_mut(&master_pid)
            .and_then(|p| p.masters.get_mut(&user))
        else {
            return Vec::new();
        };
        delta(master);
        let targets: Vec<PartitionId> = master.replica_partitions.iter().copied().collect();

        let mut locations = Vec::with_capacity(targets.len() + 1);
        locations.push(master_pid);
        for pid in targets {
            if let Some(copy) = self
                .partitions
                .get_mut(&pid)
                .and_then(|p| p.replicas.get_mut(&user))
            {
                delta(copy);
                locations.push(pid);
            }
        }
        locations
    }
}
