//! # shardgraph-repartition: Repartitioning for `shardgraph`
//!
//! Searches for a better placement of masters (and, for replica-aware
//! searches, replicas) on a [`LogicalProjection`] of the graph state, then
//! replays the resulting [`LogicalPlan`] through the kernel engine.
//!
//! ## Architecture
//!
//! - [`projection`]: Cheap copy of the assignment that searches mutate
//! - [`scratch`]: Replica changes a move or swap causes on the projection
//! - [`cost`]: What a search optimises ([`EdgeCutCost`], [`ReplicaCost`])
//! - [`local_search`]: Gain-based two-stage local search
//! - [`annealing`]: Temperature-gated pairwise swaps with parallel restarts
//! - [`metis`]: External graph partitioner subprocess
//! - [`plan`]: Plans and search outcomes
//! - [`applier`]: Replays a plan through the engine
//!
//! ## Example
//!
//! ```
//! use std::collections::BTreeSet;
//!
//! use shardgraph_kernel::{Engine, GraphState};
//! use shardgraph_repartition::{
//!     Applier, EdgeCutCost, LocalSearch, LocalSearchConfig, LogicalProjection,
//! };
//! use shardgraph_types::{FriendshipMap, MasterMap, PartitionId, ReplicaMap, UserId};
//!
//! let (p0, p1) = (PartitionId::new(0), PartitionId::new(1));
//! let (a, b) = (UserId::new(1), UserId::new(2));
//! let masters = MasterMap::from([(p0, BTreeSet::from([a])), (p1, BTreeSet::from([b]))]);
//! let replicas = ReplicaMap::from([(p0, BTreeSet::from([b])), (p1, BTreeSet::from([a]))]);
//! let friendships = FriendshipMap::from([(a, BTreeSet::from([b])), (b, BTreeSet::from([a]))]);
//! let state = GraphState::from_maps(1, &masters, &replicas, &friendships).unwrap();
//! let mut engine = Engine::with_seed(state, 1);
//!
//! let projection = LogicalProjection::from_state(engine.state());
//! let outcome = LocalSearch::new(LocalSearchConfig::default(), EdgeCutCost).run(&projection);
//! let report = Applier::apply(&mut engine, &outcome.plan).unwrap();
//!
//! assert_eq!(report.edge_cut, outcome.final_cost);
//! ```

pub mod annealing;
pub mod applier;
pub mod cost;
pub mod error;
pub mod local_search;
pub mod metis;
pub mod plan;
pub mod projection;
pub mod scratch;


// Re-export commonly used items
pub use annealing::{Annealing, AnnealingConfig};
pub use applier::{Applier, ApplyReport};
pub use cost::{CostModel, EdgeCutCost, Objective, ReplicaCost, SwapScores};
pub use error::{ExternalToolFailure, RepartitionError};
pub use local_search::{LocalSearch, LocalSearchConfig};
pub use metis::{ExternalPartitioner, MetisPartitioner, MetisRepartitioner};
pub use plan::{LogicalPlan, Move, SearchOutcome, Termination};
pub use projection::{LogicalProjection, ReplicaSets};
pub use scratch::{ReplicaChanges, ReplicaScratch, get_move_changes, get_swap_changes};
