//! # shardgraph-bench: Performance benchmarks for shardgraph
//!
//! Synthetic workloads shared by the criterion benchmarks.
//!
//! ## Benchmarks
//!
//! - **kernel**: Engine mutations (add user, befriend, partition removal)
//! - **repartition**: Local search, annealing and plan application
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p shardgraph-bench
//!
//! # Run specific benchmark
//! cargo bench -p shardgraph-bench --bench repartition
//!
//! # Save baseline for comparison
//! cargo bench -p shardgraph-bench --bench kernel -- --save-baseline main
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shardgraph_kernel::{Command, Engine, GraphState};
use shardgraph_types::{PartitionId, UserId};

/// Shape of a synthetic social graph.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub users: u64,
    pub partitions: u32,
    pub min_num_replicas: usize,
    /// Friendships created per user, on average.
    pub degree: u64,
    pub seed: u64,
}

impl Workload {
    pub fn new(users: u64, partitions: u32) -> Self {
        Self {
            users,
            partitions,
            min_num_replicas: 2,
            degree: 4,
            seed: 0x5eed,
        }
    }

    /// Partitions, then users, then random friendships.
    ///
    /// Friends are drawn mostly from a small id window around each user so
    /// the graph has communities for the searches to find.
    pub fn trace(&self) -> Vec<Command> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trace: Vec<Command> = (0..self.partitions)
            .map(|p| Command::AddPartition(PartitionId::new(p)))
            .collect();
        trace.extend((1..=self.users).map(|u| Command::AddUser(UserId::new(u))));

        let window = (self.users / u64::from(self.partitions.max(1))).max(2);
        for _ in 0..self.users * self.degree / 2 {
            let a = rng.gen_range(1..=self.users);
            let b = if rng.gen_bool(0.8) {
                let lo = a.saturating_sub(window / 2).max(1);
                let hi = (a + window / 2).min(self.users);
                rng.gen_range(lo..=hi)
            } else {
                rng.gen_range(1..=self.users)
            };
            if a != b {
                trace.push(Command::Befriend(UserId::new(a), UserId::new(b)));
            }
        }
        trace
    }

    /// Plays [`Self::trace`] into a fresh engine.
    ///
    /// # Panics
    ///
    /// Panics if the trace is rejected, which would be an engine bug.
    pub fn engine(&self) -> Engine {
        let mut engine = Engine::with_seed(GraphState::new(self.min_num_replicas), self.seed);
        for cmd in self.trace() {
            if let Err(err) = engine.apply(cmd) {
                panic!("synthetic trace rejected at {cmd:?}: {err}");
            }
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_builds_a_valid_engine() {
        let workload = Workload::new(60, 4);
        let engine = workload.engine();

        assert_eq!(engine.state().user_count(), 60);
        assert_eq!(engine.state().partition_count(), 4);
        assert!(shardgraph_kernel::invariants::check(engine.state()).is_ok());
    }

    #[test]
    fn trace_is_deterministic() {
        let workload = Workload::new(30, 3);
        assert_eq!(workload.trace(), workload.trace());
    }
}
