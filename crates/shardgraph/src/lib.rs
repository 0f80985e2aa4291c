//! # shardgraph
//!
//! A sharded social graph. Users are placed on logical partitions with one
//! master each, and replicated so that every friend of a user is present on
//! that user's master partition. Periodic repartitioning moves masters to
//! cut cross-partition friendships or total replicas.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ShardedGraph                          │
//! │  ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌─────────┐  │
//! │  │ Command │ → │  Engine  │ ← │  Applier   │ ← │ Search  │  │
//! │  │ (trace) │   │ (kernel) │   │ (replay)   │   │ (plan)  │  │
//! │  └─────────┘   └──────────┘   └────────────┘   └─────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use shardgraph::{Command, ShardedGraph, ShardgraphConfig, UserId};
//!
//! let mut config = ShardgraphConfig::default();
//! config.engine.min_num_replicas = 1;
//! let mut graph = ShardedGraph::new(config, 3).unwrap();
//!
//! for id in 1..=4 {
//!     graph.apply(Command::AddUser(UserId::new(id))).unwrap();
//! }
//! graph.apply(Command::Befriend(UserId::new(1), UserId::new(2))).unwrap();
//! graph.apply(Command::Downtime).unwrap();
//!
//! assert_eq!(graph.stats().users, 4);
//! ```

mod error;
mod graph;

#[cfg(test)]
mod tests;

pub use error::{Result, ShardgraphError};
pub use graph::{Applied, GraphStats, RepartitionReport, ShardedGraph};

// Re-export the building blocks
pub use shardgraph_config::{ConfigLoader, ShardgraphConfig, Strategy};
pub use shardgraph_kernel::{Command, Effect, Engine, GraphState, KernelError, invariants};
pub use shardgraph_repartition::{
    ApplyReport, ExternalPartitioner, ExternalToolFailure, RepartitionError, Termination,
};
pub use shardgraph_types::{FriendshipMap, MasterMap, PartitionId, ReplicaMap, UserId};
