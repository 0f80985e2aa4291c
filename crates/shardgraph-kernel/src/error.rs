//! Errors returned by engine operations.
//!
//! Every precondition is checked before the first mutation, so an `Err`
//! always leaves the state untouched.

use shardgraph_types::{PartitionId, UserId};
use thiserror::Error;

/// Errors that can occur when applying an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("partition {0} not found")]
    PartitionNotFound(PartitionId),

    #[error("user {0} already exists")]
    UserAlreadyExists(UserId),

    #[error("partition {0} already exists")]
    PartitionAlreadyExists(PartitionId),

    #[error("user {0} cannot befriend itself")]
    SelfFriendship(UserId),

    #[error("no partitions to place user {0} on")]
    NoPartitions(UserId),

    #[error("{required} partitions required to keep the replication floor, {available} available")]
    InsufficientPartitions { required: usize, available: usize },

    #[error("removing the replica of user {user} on {partition} would drop below {min} replicas")]
    ReplicationFloor {
        user: UserId,
        partition: PartitionId,
        min: usize,
    },

    #[error("the replica of user {user} on {partition} serves a friend mastered there")]
    ReplicaInUse { user: UserId, partition: PartitionId },

    #[error("user {user} has no replica on {partition}")]
    ReplicaNotFound { user: UserId, partition: PartitionId },

    #[error("{partition} already holds the master of user {user}")]
    MasterPartition { user: UserId, partition: PartitionId },

    #[error("inconsistent input: {0}")]
    InconsistentInput(String),
}

impl KernelError {
    /// Returns true for the "unknown id" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KernelError::UserNotFound(_)
                | KernelError::PartitionNotFound(_)
                | KernelError::ReplicaNotFound { .. }
        )
    }
}
