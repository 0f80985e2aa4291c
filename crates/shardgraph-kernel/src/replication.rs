//! Replica primitives and repair passes.

use shardgraph_types::{PartitionId, UserId};

use crate::effects::Effect;
use crate::engine::Engine;
use crate::error::KernelError;
use crate::policy::BefriendingPolicy;
use crate::rules;

impl<R, P> Engine<R, P>
where
    R: rand::Rng,
    P: BefriendingPolicy,
{
    /// Creates a replica of `user` on `pid`.
    ///
    /// Adding a replica that already exists is a no-op.
    pub fn add_replica(&mut self, user: UserId, pid: PartitionId) -> Result<Vec<Effect>, KernelError> {
        let master_pid = self.require_user(user)?;
        self.require_partition(pid)?;
        if master_pid == pid {
            return Err(KernelError::MasterPartition { user, partition: pid });
        }
        if self.state.has_replica(user, pid) {
            return Ok(Vec::new());
        }
        Ok(vec![self.add_replica_unchecked(user, pid)])
    }

    /// Destroys the replica of `user` on `pid`.
    ///
    /// Does nothing if there is no replica there. Refuses to go below the
    /// replication floor or to strand a friend mastered on `pid`.
    pub fn remove_replica(
        &mut self,
        user: UserId,
        pid: PartitionId,
    ) -> Result<Vec<Effect>, KernelError> {
        self.require_user(user)?;
        self.require_partition(pid)?;
        if !self.state.has_replica(user, pid) {
            return Ok(Vec::new());
        }
        if rules::replica_needed(&self.state, user, pid) {
            return Err(KernelError::ReplicaInUse {
                user,
                partition: pid,
            });
        }
        let min = self.state.min_num_replicas();
        if self.state.replica_count_of(user) <= min {
            return Err(KernelError::ReplicationFloor {
                user,
                partition: pid,
                min,
            });
        }
        Ok(vec![self.remove_replica_unchecked(user, pid)])
    }

    /// Restores the replication floor and friend locality for every user,
    /// then deletes replicas nobody needs.
    pub fn repair_replication(&mut self) -> Vec<Effect> {
        let users: Vec<UserId> = self.state.users().map(|(u, _)| u).collect();
        let mut effects = Vec::new();
        for user in &users {
            effects.extend(self.ensure_friend_locality(*user));
        }
        for user in &users {
            effects.extend(self.ensure_replication_floor(*user));
        }
        for user in &users {
            effects.extend(self.prune_replicas(*user));
        }
        effects
    }

    // ========================================================================
    // Internal helpers (preconditions already checked)
    // ========================================================================

    /// Copies the master of `user` onto `pid` and rewrites the replica set
    /// of every copy.
    pub(crate) fn add_replica_unchecked(&mut self, user: UserId, pid: PartitionId) -> Effect {
        let mut copy = match self.state.master(user) {
            Some(master) => master.clone(),
            None => panic!("add_replica_unchecked: user {user} has no master"),
        };
        copy.replica_partitions.insert(pid);
        let replica_partitions = copy.replica_partitions.clone();
        self.state.insert_replica(pid, copy);

        let locations = self.state.update_copies(user, |c| {
            c.replica_partitions.clone_from(&replica_partitions);
        });

        // Postcondition: the new replica is reachable through the master
        debug_assert!(locations.contains(&pid));

        Effect::ReplicaAdded {
            user,
            partition: pid,
            locations,
        }
    }

    /// Deletes the replica of `user` on `pid`, ignoring the floor.
    pub(crate) fn remove_replica_unchecked(&mut self, user: UserId, pid: PartitionId) -> Effect {
        self.state.take_replica(user, pid);
        let locations = self.state.update_copies(user, |c| {
            c.replica_partitions.remove(&pid);
        });
        Effect::ReplicaRemoved {
            user,
            partition: pid,
            locations,
        }
    }

    /// Adds a replica of every friend of `user` that is missing on the
    /// user's master partition.
    pub(crate) fn ensure_friend_locality(&mut self, user: UserId) -> Vec<Effect> {
        let Some(master) = self.state.master(user) else {
            return Vec::new();
        };
        let home = master.master_partition;
        let missing: Vec<UserId> = master
            .friends
            .iter()
            .copied()
            .filter(|f| !self.state.is_present(*f, home))
            .collect();
        missing
            .into_iter()
            .map(|f| self.add_replica_unchecked(f, home))
            .collect()
    }

    /// Adds replicas on random partitions until `user` meets the floor.
    pub(crate) fn ensure_replication_floor(&mut self, user: UserId) -> Vec<Effect> {
        let mut effects = Vec::new();
        while self.state.user_exists(user)
            && self.state.replica_count_of(user) < self.state.min_num_replicas()
        {
            let Some(pid) = self.random_absent_partition(user) else {
                break;
            };
            effects.push(self.add_replica_unchecked(user, pid));
        }
        effects
    }

    /// Deletes every replica of `user` that is neither needed nor required
    /// by the floor.
    pub(crate) fn prune_replicas(&mut self, user: UserId) -> Vec<Effect> {
        let Some(partitions) = self.state.replica_partitions_of(user).cloned() else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        for pid in partitions {
            if rules::replica_removable(&self.state, user, pid) {
                effects.push(self.remove_replica_unchecked(user, pid));
            }
        }
        effects
    }
}
