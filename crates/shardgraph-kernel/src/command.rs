//! Commands accepted by the engine.
//!
//! This is the complete external mutation surface: a trace driver feeds a
//! sequence of these into [`crate::Engine::apply`].

use serde::{Deserialize, Serialize};
use shardgraph_types::{PartitionId, UserId};

/// A structural mutation of the social graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Add a new user with no friends.
    AddUser(UserId),
    /// Remove a user and every friendship it takes part in.
    RemoveUser(UserId),
    /// Create a friendship between two users.
    Befriend(UserId, UserId),
    /// Destroy a friendship between two users.
    Unfriend(UserId, UserId),
    /// Add an empty partition with the given id.
    AddPartition(PartitionId),
    /// Remove a partition, relocating everything it holds.
    RemovePartition(PartitionId),
    /// Barrier with no structural effect; callers use it to trigger a
    /// repartitioning pass.
    Downtime,
}

impl Command {
    /// Returns true if this command can change the graph state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Command::Downtime)
    }
}
