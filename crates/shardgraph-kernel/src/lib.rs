//! # shardgraph-kernel: Placement engine of `shardgraph`
//!
//! The kernel owns the sharded social graph: which partition holds each
//! user's master, which partitions hold its replicas, and the friendship
//! adjacency that drives replica placement. Every mutation goes through the
//! [`Engine`], which re-establishes the placement invariants before it
//! returns.
//!
//! ## Invariants
//!
//! - **Single master**: every user has exactly one master partition.
//! - **Minimum replication**: every user has at least `min_num_replicas`
//!   replicas.
//! - **Friend locality**: every friend of a user has a master or a replica
//!   on that user's master partition.
//! - **Replica fidelity**: replicas mirror their master's friends, master
//!   pointer and replica set.
//!
//! ## Architecture
//!
//! - [`command`]: External mutation vocabulary (`AddUser`, `Befriend`, ...)
//! - [`effects`]: Log of the placement changes an operation performed
//! - [`state`]: Partitions owning value copies of masters and replicas
//! - [`engine`]: The [`Engine`] that applies operations to the state
//! - [`policy`]: The befriending policy that decides whether a master moves
//! - [`rules`]: Replica eligibility rules shared by the engine and the policy
//! - [`invariants`]: Full consistency checker
//!
//! ## Example
//!
//! ```
//! use shardgraph_kernel::{Command, Engine, GraphState};
//! use shardgraph_types::{PartitionId, UserId};
//!
//! let mut engine = Engine::with_seed(GraphState::new(1), 7);
//! for pid in 0..3 {
//!     engine.apply(Command::AddPartition(PartitionId::new(pid))).unwrap();
//! }
//! engine.apply(Command::AddUser(UserId::new(1))).unwrap();
//! engine.apply(Command::AddUser(UserId::new(2))).unwrap();
//! engine.apply(Command::Befriend(UserId::new(1), UserId::new(2))).unwrap();
//!
//! assert!(shardgraph_kernel::invariants::check(engine.state()).is_ok());
//! ```

pub mod command;
pub mod effects;
pub mod engine;
pub mod error;
pub mod invariants;
mod migration;
pub mod policy;
mod replication;
pub mod rules;
pub mod state;


#[cfg(test)]
mod tests_invariants;

// Re-export commonly used items
pub use command::Command;
pub use effects::Effect;
pub use engine::Engine;
pub use error::KernelError;
pub use invariants::{Invariant, InvariantViolation};
pub use policy::{
    BefriendDecision, BefriendingPolicy, ReplicaProjection, ReplicateOnlyPolicy,
    SparBefriendingPolicy,
};
pub use rules::MovePlan;
pub use state::{GraphState, Partition, UserCopy};
