//! Full-state invariant checker.
//!
//! [`check`] walks the whole state and reports the first violation it finds.
//! The engine runs it after every command in debug builds; the repartition
//! applier runs it after replaying a plan.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use shardgraph_types::{PartitionId, UserId};
use thiserror::Error;

use crate::state::GraphState;

/// The placement properties a valid state satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Invariant {
    /// Every user is mastered on exactly one partition.
    SingleMaster,
    /// Every user has at least `min_num_replicas` replicas.
    MinimumReplication,
    /// Every friend of a user is present on the user's master partition.
    FriendLocality,
    /// Every replica matches its master and the master's replica set lists
    /// exactly the partitions holding a replica.
    ReplicaFidelity,
    /// No partition holds both the master and a replica of one user.
    PartitionDisjoint,
    /// The user index agrees with the partitions' master maps.
    IndexConsistency,
    /// Friendships are symmetric, irreflexive, and between known users.
    FriendSymmetry,
}

/// A broken invariant, with a human-readable location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{invariant:?} violated: {message}")]
pub struct InvariantViolation {
    pub invariant: Invariant,
    pub message: String,
}

impl InvariantViolation {
    fn new(invariant: Invariant, message: impl Into<String>) -> Self {
        Self {
            invariant,
            message: message.into(),
        }
    }
}

/// Verifies every invariant of `state`.
pub fn check(state: &GraphState) -> Result<(), InvariantViolation> {
    check_masters(state)?;
    check_replicas(state)?;
    check_friendships(state)?;
    Ok(())
}

fn check_masters(state: &GraphState) -> Result<(), InvariantViolation> {
    let mut seen: BTreeMap<UserId, PartitionId> = BTreeMap::new();
    for partition in state.partitions() {
        for (user, copy) in partition.masters() {
            if let Some(other) = seen.insert(*user, partition.id()) {
                return Err(InvariantViolation::new(
                    Invariant::SingleMaster,
                    format!("user {user} mastered on {other} and {}", partition.id()),
                ));
            }
            if copy.id != *user || copy.master_partition != partition.id() {
                return Err(InvariantViolation::new(
                    Invariant::IndexConsistency,
                    format!(
                        "master copy of {user} on {} claims id {} on {}",
                        partition.id(),
                        copy.id,
                        copy.master_partition
                    ),
                ));
            }
        }
    }

    let index: BTreeMap<UserId, PartitionId> = state.users().collect();
    if index != seen {
        let culprit = index
            .iter()
            .find(|(u, p)| seen.get(u) != Some(p))
            .map(|(u, _)| *u)
            .or_else(|| seen.keys().find(|u| !index.contains_key(u)).copied());
        let message = match culprit {
            Some(user) => format!(
                "index says {user} is on {:?}, partitions say {:?}",
                index.get(&user),
                seen.get(&user)
            ),
            None => "index and partitions disagree".to_owned(),
        };
        return Err(InvariantViolation::new(Invariant::IndexConsistency, message));
    }
    Ok(())
}

fn check_replicas(state: &GraphState) -> Result<(), InvariantViolation> {
    let mut holders: BTreeMap<UserId, BTreeSet<PartitionId>> = BTreeMap::new();
    for partition in state.partitions() {
        let pid = partition.id();
        for (user, copy) in partition.replicas() {
            if partition.masters().contains_key(user) {
                return Err(InvariantViolation::new(
                    Invariant::PartitionDisjoint,
                    format!("{pid} holds both the master and a replica of {user}"),
                ));
            }
            let Some(master) = state.master(*user) else {
                return Err(InvariantViolation::new(
                    Invariant::ReplicaFidelity,
                    format!("replica of {user} on {pid} has no master"),
                ));
            };
            if copy != master {
                return Err(InvariantViolation::new(
                    Invariant::ReplicaFidelity,
                    format!("replica of {user} on {pid} differs from its master"),
                ));
            }
            holders.entry(*user).or_default().insert(pid);
        }
    }

    let min = state.min_num_replicas();
    for (user, master_pid) in state.users() {
        let Some(master) = state.master(user) else {
            continue;
        };
        let actual = holders.remove(&user).unwrap_or_default();
        if master.replica_partitions != actual {
            return Err(InvariantViolation::new(
                Invariant::ReplicaFidelity,
                format!(
                    "{user} lists replicas on {:?} but they exist on {actual:?}",
                    master.replica_partitions
                ),
            ));
        }
        if actual.contains(&master_pid) {
            return Err(InvariantViolation::new(
                Invariant::PartitionDisjoint,
                format!("{user} lists a replica on its master partition {master_pid}"),
            ));
        }
        if actual.len() < min {
            return Err(InvariantViolation::new(
                Invariant::MinimumReplication,
                format!("{user} has {} replicas, minimum is {min}", actual.len()),
            ));
        }
    }
    Ok(())
}

fn check_friendships(state: &GraphState) -> Result<(), InvariantViolation> {
    for (user, master_pid) in state.users() {
        let Some(friends) = state.friends_of(user) else {
            continue;
        };
        for friend in friends {
            if *friend == user {
                return Err(InvariantViolation::new(
                    Invariant::FriendSymmetry,
                    format!("{user} is its own friend"),
                ));
            }
            if !state.are_friends(*friend, user) {
                return Err(InvariantViolation::new(
                    Invariant::FriendSymmetry,
                    format!("{user} lists {friend} but not the other way round"),
                ));
            }
            if !state.is_present(*friend, master_pid) {
                return Err(InvariantViolation::new(
                    Invariant::FriendLocality,
                    format!("friend {friend} of {user} is absent from {master_pid}"),
                ));
            }
        }
    }
    Ok(())
}
