//! Repartitioning errors.

use std::path::PathBuf;

use shardgraph_kernel::KernelError;
use shardgraph_types::{PartitionId, UserId};
use thiserror::Error;

/// Failure of the external partitioner subprocess or of parsing its output.
///
/// None of these ever produce a partial plan.
#[derive(Debug, Error)]
pub enum ExternalToolFailure {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{executable} exited with {status}: {stderr}")]
    NonZeroExit {
        executable: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("partition file {0} was not produced")]
    MissingOutput(PathBuf),

    #[error("line {line} of the partition file is not a partition index: {content:?}")]
    Malformed { line: usize, content: String },

    #[error("partition file has {actual} lines, expected {expected}")]
    WrongLineCount { expected: usize, actual: usize },

    #[error("line {line} assigns partition index {index}, only {partitions} partitions exist")]
    PartitionOutOfRange {
        line: usize,
        index: usize,
        partitions: usize,
    },
}

/// Errors that can occur while planning or applying a repartition.
#[derive(Debug, Error)]
pub enum RepartitionError {
    #[error("external partitioner failed: {0}")]
    External(#[from] ExternalToolFailure),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("cannot repartition without partitions")]
    NoPartitions,

    #[error("plan expects user {user} on {expected}, found {actual:?}")]
    StalePlan {
        user: UserId,
        expected: PartitionId,
        actual: Option<PartitionId>,
    },
}
