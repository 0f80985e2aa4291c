//! The engine - invariant-preserving mutation of the graph state.
//!
//! Every operation validates its preconditions before touching the state,
//! performs its multi-target writes, and reports what it did as a list of
//! [`Effect`]s. Operations are synchronous and assume a single writer.
//!
//! # Example
//!
//! ```
//! use shardgraph_kernel::{Engine, GraphState};
//! use shardgraph_types::UserId;
//!
//! let mut engine = Engine::with_seed(GraphState::new(1), 42);
//! engine.add_partition();
//! engine.add_partition();
//! let effects = engine.add_user(UserId::new(1)).unwrap();
//! assert_eq!(effects.len(), 2); // master placed + one replica
//! ```

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use shardgraph_types::{PartitionId, UserId};
use tracing::debug;

use crate::command::Command;
use crate::effects::Effect;
use crate::error::KernelError;
use crate::policy::{BefriendDecision, BefriendingPolicy, SparBefriendingPolicy};
use crate::rules;
use crate::state::{GraphState, UserCopy};

/// Applies mutations to a [`GraphState`] while preserving its invariants.
///
/// Randomness (replica placement) comes from the injected generator `R`, so
/// a seeded generator makes every run reproducible.
#[derive(Debug, Clone)]
pub struct Engine<R = StdRng, P = SparBefriendingPolicy> {
    pub(crate) state: GraphState,
    pub(crate) rng: R,
    policy: P,
}

impl Engine<StdRng, SparBefriendingPolicy> {
    /// Creates an engine with a seeded standard generator and the default
    /// befriending policy.
    pub fn with_seed(state: GraphState, seed: u64) -> Self {
        Self::new(state, StdRng::seed_from_u64(seed), SparBefriendingPolicy)
    }
}

impl<R, P> Engine<R, P>
where
    R: rand::Rng,
    P: BefriendingPolicy,
{
    pub fn new(state: GraphState, rng: R, policy: P) -> Self {
        Self { state, rng, policy }
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn into_state(self) -> GraphState {
        self.state
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Applies a trace command.
    ///
    /// In debug builds the full invariant checker runs after every command.
    pub fn apply(&mut self, cmd: Command) -> Result<Vec<Effect>, KernelError> {
        let effects = match cmd {
            Command::AddUser(user) => self.add_user(user)?,
            Command::RemoveUser(user) => self.remove_user(user)?,
            Command::Befriend(a, b) => self.befriend(a, b)?,
            Command::Unfriend(a, b) => self.unfriend(a, b)?,
            Command::AddPartition(pid) => self.add_partition_with_id(pid)?,
            Command::RemovePartition(pid) => self.remove_partition(pid)?,
            Command::Downtime => Vec::new(),
        };

        #[cfg(debug_assertions)]
        if let Err(violation) = crate::invariants::check(&self.state) {
            panic!("invariant violated after {cmd:?}: {violation}");
        }

        Ok(effects)
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Adds a friendless user.
    ///
    /// The master goes to the partition with the fewest masters (lowest id
    /// on ties); `min_num_replicas` replicas go to other partitions chosen
    /// uniformly at random.
    pub fn add_user(&mut self, user: UserId) -> Result<Vec<Effect>, KernelError> {
        if self.state.user_exists(user) {
            return Err(KernelError::UserAlreadyExists(user));
        }
        let min = self.state.min_num_replicas();
        let master_pid = self
            .state
            .partitions()
            .min_by_key(|p| (p.master_count(), p.id()))
            .map(crate::state::Partition::id)
            .ok_or(KernelError::NoPartitions(user))?;
        if self.state.partition_count() < min + 1 {
            return Err(KernelError::InsufficientPartitions {
                required: min + 1,
                available: self.state.partition_count(),
            });
        }

        let others: Vec<PartitionId> = self
            .state
            .partition_ids()
            .into_iter()
            .filter(|p| *p != master_pid)
            .collect();
        let mut copy = UserCopy::new(user, master_pid);
        copy.replica_partitions = others
            .choose_multiple(&mut self.rng, min)
            .copied()
            .collect();

        let locations: Vec<PartitionId> = std::iter::once(master_pid)
            .chain(copy.replica_partitions.iter().copied())
            .collect();
        let mut effects = vec![Effect::MasterPlaced {
            user,
            partition: master_pid,
        }];
        for pid in &copy.replica_partitions {
            self.state.insert_replica(*pid, copy.clone());
            effects.push(Effect::ReplicaAdded {
                user,
                partition: *pid,
                locations: locations.clone(),
            });
        }
        self.state.insert_master(copy);

        // Postcondition: user exists with exactly `min` replicas
        debug_assert_eq!(self.state.master_partition_of(user), Some(master_pid));
        debug_assert_eq!(self.state.replica_count_of(user), min);

        Ok(effects)
    }

    /// Removes a user, its replicas, and every friendship it takes part in.
    ///
    /// Replicas of former friends that existed only for this user are
    /// deleted when the replication floor allows it.
    pub fn remove_user(&mut self, user: UserId) -> Result<Vec<Effect>, KernelError> {
        let master = self
            .state
            .master(user)
            .cloned()
            .ok_or(KernelError::UserNotFound(user))?;

        let mut effects = Vec::new();
        for pid in &master.replica_partitions {
            self.state.take_replica(user, *pid);
            effects.push(Effect::ReplicaRemoved {
                user,
                partition: *pid,
                locations: vec![*pid],
            });
        }
        self.state.take_master(user);
        effects.push(Effect::MasterRemoved {
            user,
            partition: master.master_partition,
        });

        for friend in &master.friends {
            let locations = self.state.update_copies(*friend, |copy| {
                copy.friends.remove(&user);
            });
            effects.push(Effect::FriendshipRemoved {
                user: *friend,
                friend: user,
                locations,
            });
        }

        for friend in &master.friends {
            effects.extend(self.prune_replicas(*friend));
        }

        // Postcondition: no trace of the user remains
        assert!(
            !self.state.user_exists(user),
            "user {user} must not exist after removal"
        );

        Ok(effects)
    }

    // ========================================================================
    // Friendships
    // ========================================================================

    /// Creates a friendship and re-establishes friend locality.
    ///
    /// When the endpoints are mastered on different partitions the
    /// befriending policy decides between cross-replicating and moving one
    /// of the masters.
    pub fn befriend(&mut self, a: UserId, b: UserId) -> Result<Vec<Effect>, KernelError> {
        self.require_user(a)?;
        self.require_user(b)?;
        if a == b {
            return Err(KernelError::SelfFriendship(a));
        }
        if self.state.are_friends(a, b) {
            return Ok(Vec::new());
        }

        let mut effects = self.link(a, b);

        let (small, large) = if a < b { (a, b) } else { (b, a) };
        let (Some(p_small), Some(p_large)) = (
            self.state.master_partition_of(small),
            self.state.master_partition_of(large),
        ) else {
            return Err(KernelError::UserNotFound(small));
        };
        if p_small == p_large {
            return Ok(effects);
        }

        let decision = self.policy.decide(&self.state, small, large);
        debug!(%small, %large, ?decision, "befriend across partitions");

        match decision {
            BefriendDecision::NoChange => {
                if !self.state.is_present(small, p_large) {
                    effects.push(self.add_replica_unchecked(small, p_large));
                }
                if !self.state.is_present(large, p_small) {
                    effects.push(self.add_replica_unchecked(large, p_small));
                }
            }
            BefriendDecision::MoveUToV => effects.extend(self.relocate_master(small, p_large)?),
            BefriendDecision::MoveVToU => effects.extend(self.relocate_master(large, p_small)?),
        }

        Ok(effects)
    }

    /// Destroys a friendship and drops replicas that only served it.
    pub fn unfriend(&mut self, a: UserId, b: UserId) -> Result<Vec<Effect>, KernelError> {
        self.require_user(a)?;
        self.require_user(b)?;
        if !self.state.are_friends(a, b) {
            return Ok(Vec::new());
        }

        let mut effects = Vec::with_capacity(2);
        for (user, friend) in [(a, b), (b, a)] {
            let locations = self.state.update_copies(user, |copy| {
                copy.friends.remove(&friend);
            });
            effects.push(Effect::FriendshipRemoved {
                user,
                friend,
                locations,
            });
        }

        let pa = self.state.master_partition_of(a);
        let pb = self.state.master_partition_of(b);
        if let (Some(pa), Some(pb)) = (pa, pb)
            && pa != pb
        {
            if rules::replica_removable(&self.state, a, pb) {
                effects.push(self.remove_replica_unchecked(a, pb));
            }
            if rules::replica_removable(&self.state, b, pa) {
                effects.push(self.remove_replica_unchecked(b, pa));
            }
        }

        Ok(effects)
    }

    fn link(&mut self, a: UserId, b: UserId) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        for (user, friend) in [(a, b), (b, a)] {
            let locations = self.state.update_copies(user, |copy| {
                copy.friends.insert(friend);
            });
            effects.push(Effect::FriendshipAdded {
                user,
                friend,
                locations,
            });
        }
        effects
    }

    // ========================================================================
    // Preconditions
    // ========================================================================

    pub(crate) fn require_user(&self, user: UserId) -> Result<PartitionId, KernelError> {
        self.state
            .master_partition_of(user)
            .ok_or(KernelError::UserNotFound(user))
    }

    pub(crate) fn require_partition(&self, pid: PartitionId) -> Result<(), KernelError> {
        if self.state.partition_exists(pid) {
            Ok(())
        } else {
            Err(KernelError::PartitionNotFound(pid))
        }
    }

    /// Picks a partition that holds no copy of `user`, uniformly at random.
    pub(crate) fn random_absent_partition(&mut self, user: UserId) -> Option<PartitionId> {
        let candidates: Vec<PartitionId> = self
            .state
            .partition_ids()
            .into_iter()
            .filter(|p| !self.state.is_present(user, *p))
            .collect();
        candidates.choose(&mut self.rng).copied()
    }
}
