//! Error types for the shardgraph facade

use shardgraph_config::ConfigError;
use shardgraph_kernel::KernelError;
use shardgraph_repartition::RepartitionError;
use thiserror::Error;

/// Result type for shardgraph operations.
pub type Result<T> = std::result::Result<T, ShardgraphError>;

/// Errors that can occur while driving a [`crate::ShardedGraph`].
#[derive(Debug, Error)]
pub enum ShardgraphError {
    /// A mutation referenced an unknown id or broke a precondition.
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// Planning or applying a repartition failed.
    #[error("repartition error: {0}")]
    Repartition(#[from] RepartitionError),

    /// The configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ShardgraphError {
    /// Returns true if the error is an unknown user, partition or replica.
    pub fn is_not_found(&self) -> bool {
        match self {
            ShardgraphError::Kernel(err)
            | ShardgraphError::Repartition(RepartitionError::Kernel(err)) => err.is_not_found(),
            _ => false,
        }
    }
}
