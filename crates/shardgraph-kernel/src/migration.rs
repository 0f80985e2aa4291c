//! Master relocation and partition lifecycle.

use std::collections::{BTreeMap, BTreeSet};

use shardgraph_types::{PartitionId, UserId};
use tracing::{debug, info};

use crate::effects::Effect;
use crate::engine::Engine;
use crate::error::KernelError;
use crate::policy::BefriendingPolicy;
use crate::rules;
use crate::state::UserCopy;

impl<R, P> Engine<R, P>
where
    R: rand::Rng,
    P: BefriendingPolicy,
{
    // ========================================================================
    // Masters
    // ========================================================================

    /// Relocates the master of `user` to `to`.
    ///
    /// Steps, in order:
    /// 1. move the master and re-point every replica;
    /// 2. leave a replica on the old partition if friends are still mastered
    ///    there;
    /// 3. replicate each user of `replicate_at_dest` on `to` if absent;
    /// 4. drop the mover's now redundant replica on `to`, first adding a
    ///    compensating replica elsewhere when the floor requires it;
    /// 5. delete the replicas on the old partition of users in
    ///    `delete_at_source` that are no longer needed there.
    pub fn move_user(
        &mut self,
        user: UserId,
        to: PartitionId,
        replicate_at_dest: &BTreeSet<UserId>,
        delete_at_source: &BTreeSet<UserId>,
    ) -> Result<Vec<Effect>, KernelError> {
        let from = self.require_user(user)?;
        self.require_partition(to)?;
        for other in replicate_at_dest.iter().chain(delete_at_source) {
            self.require_user(*other)?;
        }
        if from == to {
            return Ok(Vec::new());
        }

        let mut effects = Vec::new();

        // 1. Master record and master pointers
        let Some(mut master) = self.state.take_master(user) else {
            return Err(KernelError::UserNotFound(user));
        };
        master.master_partition = to;
        self.state.insert_master(master);
        let locations = self.state.update_copies(user, |c| c.master_partition = to);
        effects.push(Effect::MasterMoved {
            user,
            from,
            to,
            locations,
        });

        // 2. Friends left behind still need to see the mover
        if rules::has_friend_mastered_on(&self.state, user, from, None)
            && !self.state.has_replica(user, from)
        {
            effects.push(self.add_replica_unchecked(user, from));
        }

        // 3. Friend locality at the destination
        for friend in replicate_at_dest {
            if *friend != user && !self.state.is_present(*friend, to) {
                effects.push(self.add_replica_unchecked(*friend, to));
            }
        }

        // 4. The replica co-located with the master is redundant
        if self.state.has_replica(user, to) {
            if self.state.replica_count_of(user) <= self.state.min_num_replicas()
                && let Some(pid) = self.random_absent_partition(user)
            {
                effects.push(self.add_replica_unchecked(user, pid));
            }
            effects.push(self.remove_replica_unchecked(user, to));
        }

        // 5. Replicas stranded on the source
        for friend in delete_at_source {
            if rules::replica_removable(&self.state, *friend, from) {
                effects.push(self.remove_replica_unchecked(*friend, from));
            }
        }

        // Postcondition: master now lives on the destination
        assert_eq!(
            self.state.master_partition_of(user),
            Some(to),
            "master of {user} must be on {to} after move"
        );
        debug_assert!(!self.state.has_replica(user, to));

        debug!(%user, %from, %to, effects = effects.len(), "moved master");
        Ok(effects)
    }

    /// Moves the master of `user` to `to`, deriving the replicate and delete
    /// sets from the replica eligibility rules.
    pub fn relocate_master(
        &mut self,
        user: UserId,
        to: PartitionId,
    ) -> Result<Vec<Effect>, KernelError> {
        self.require_partition(to)?;
        let plan = rules::plan_move(&self.state, user, to).ok_or(KernelError::UserNotFound(user))?;
        self.move_user(user, to, &plan.replicate_at_dest, &plan.delete_at_source)
    }

    /// Turns the replica of `user` on `pid` into its master.
    ///
    /// The previous master copy is dropped. If the previous partition still
    /// exists and masters friends of `user`, a replica is left there; the
    /// friends of `user` gain replicas on `pid` where missing, and the
    /// replication floor is restored.
    pub fn promote_replica_to_master(
        &mut self,
        user: UserId,
        pid: PartitionId,
    ) -> Result<Vec<Effect>, KernelError> {
        let old = self.require_user(user)?;
        self.require_partition(pid)?;
        if !self.state.has_replica(user, pid) {
            return Err(KernelError::ReplicaNotFound {
                user,
                partition: pid,
            });
        }

        let mut effects = vec![self.promote_in_place(user, pid)];
        effects.extend(self.ensure_friend_locality(user));
        if self.state.partition_exists(old)
            && rules::has_friend_mastered_on(&self.state, user, old, None)
            && !self.state.is_present(user, old)
        {
            effects.push(self.add_replica_unchecked(user, old));
        }
        effects.extend(self.ensure_replication_floor(user));
        Ok(effects)
    }

    /// Swaps the replica on `pid` in as master without any repair.
    fn promote_in_place(&mut self, user: UserId, pid: PartitionId) -> Effect {
        let from = self.state.master_partition_of(user).unwrap_or(pid);
        let Some(mut copy) = self.state.take_replica(user, pid) else {
            panic!("promote_in_place: user {user} has no replica on {pid}");
        };
        self.state.take_master(user);

        copy.master_partition = pid;
        copy.replica_partitions.remove(&pid);
        self.state.insert_master(copy);
        let locations = self.state.update_copies(user, |c| {
            c.master_partition = pid;
            c.replica_partitions.remove(&pid);
        });

        Effect::ReplicaPromoted {
            user,
            from,
            to: pid,
            locations,
        }
    }

    // ========================================================================
    // Partitions
    // ========================================================================

    /// Adds an empty partition with the next unused id.
    pub fn add_partition(&mut self) -> PartitionId {
        let pid = self
            .state
            .partition_ids()
            .last()
            .map_or(PartitionId::new(0), |p| p.next());
        self.state.insert_partition(pid);
        info!(partition = %pid, "partition added");
        pid
    }

    /// Adds an empty partition with a caller-chosen id.
    pub fn add_partition_with_id(&mut self, pid: PartitionId) -> Result<Vec<Effect>, KernelError> {
        if self.state.partition_exists(pid) {
            return Err(KernelError::PartitionAlreadyExists(pid));
        }
        self.state.insert_partition(pid);
        info!(partition = %pid, "partition added");
        Ok(vec![Effect::PartitionAdded(pid)])
    }

    /// Removes a partition.
    ///
    /// Replica references to `pid` are stripped first. Each master on `pid`
    /// then goes to the currently lightest partition. On a load tie a
    /// partition that already holds a replica of it wins, and that replica
    /// is promoted in place. Finally friend
    /// locality and the replication floor are restored for every user that
    /// was displaced or lost a replica.
    pub fn remove_partition(&mut self, pid: PartitionId) -> Result<Vec<Effect>, KernelError> {
        self.require_partition(pid)?;
        let min = self.state.min_num_replicas();
        let remaining = self.state.partition_count() - 1;
        if self.state.user_count() > 0 && remaining < min + 1 {
            return Err(KernelError::InsufficientPartitions {
                required: min + 1,
                available: remaining,
            });
        }
        let Some(removed) = self.state.take_partition(pid) else {
            return Err(KernelError::PartitionNotFound(pid));
        };
        let (displaced, replicas) = removed.into_parts();

        let mut effects = Vec::new();

        // Strip references to the vanished replicas
        let mut touched: BTreeSet<UserId> = BTreeSet::new();
        for user in replicas.keys() {
            let locations = self.state.update_copies(*user, |c| {
                c.replica_partitions.remove(&pid);
            });
            effects.push(Effect::ReplicaRemoved {
                user: *user,
                partition: pid,
                locations,
            });
            touched.insert(*user);
        }

        // Water-fill the displaced masters
        let mut loads: BTreeMap<PartitionId, usize> = self
            .state
            .partitions()
            .map(|p| (p.id(), p.master_count()))
            .collect();
        let mut moved = Vec::with_capacity(displaced.len());
        for (user, copy) in displaced {
            let Some(dest) = lightest_destination(&loads, &copy.replica_partitions) else {
                break;
            };
            *loads.entry(dest).or_default() += 1;
            if copy.replica_partitions.contains(&dest) {
                effects.push(self.promote_in_place(user, dest));
            } else {
                effects.push(self.place_displaced_master(copy, pid, dest));
            }
            moved.push(user);
            touched.insert(user);
        }

        for user in &moved {
            effects.extend(self.ensure_friend_locality(*user));
        }
        for user in touched {
            effects.extend(self.ensure_replication_floor(user));
        }

        // Postcondition: nobody references the removed partition
        debug_assert!(self.state.users().all(|(u, p)| {
            p != pid
                && !self
                    .state
                    .replica_partitions_of(u)
                    .is_some_and(|r| r.contains(&pid))
        }));

        effects.push(Effect::PartitionRemoved(pid));
        info!(partition = %pid, relocated = moved.len(), "partition removed");
        Ok(effects)
    }

    fn place_displaced_master(
        &mut self,
        mut copy: UserCopy,
        from: PartitionId,
        to: PartitionId,
    ) -> Effect {
        let user = copy.id;
        copy.master_partition = to;
        self.state.insert_master(copy);
        let locations = self.state.update_copies(user, |c| c.master_partition = to);
        Effect::MasterMoved {
            user,
            from,
            to,
            locations,
        }
    }
}

/// Lightest partition overall. Among partitions tied at the minimum load a
/// member of `preferred` wins, then the lowest id.
fn lightest_destination(
    loads: &BTreeMap<PartitionId, usize>,
    preferred: &BTreeSet<PartitionId>,
) -> Option<PartitionId> {
    loads
        .iter()
        .min_by_key(|(pid, load)| (**load, !preferred.contains(*pid), **pid))
        .map(|(pid, _)| *pid)
}
