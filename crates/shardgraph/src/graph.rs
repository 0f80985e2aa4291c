//! The sharded graph manager.

use std::fs;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use shardgraph_config::{ShardgraphConfig, Strategy};
use shardgraph_kernel::{Command, Effect, Engine, GraphState};
use shardgraph_repartition::{
    Annealing, AnnealingConfig, Applier, ApplyReport, EdgeCutCost, ExternalPartitioner,
    ExternalToolFailure, LocalSearch, LocalSearchConfig, LogicalPlan, LogicalProjection,
    MetisPartitioner, MetisRepartitioner, ReplicaCost, SearchOutcome, Termination,
};
use shardgraph_types::PartitionId;
use tracing::{info, warn};

use crate::error::Result;

/// Placement statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub users: usize,
    pub partitions: usize,
    /// Friendships whose endpoints are mastered on different partitions.
    pub edge_cut: usize,
    pub replicas: usize,
    /// Replicas per user, zero for an empty graph.
    pub replication_factor: f64,
}

/// Outcome of one repartitioning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepartitionReport {
    pub strategy: Strategy,
    /// Search rounds or sweeps, zero for external and disabled passes.
    pub rounds: usize,
    pub termination: Termination,
    pub before: GraphStats,
    pub after: GraphStats,
    pub applied: ApplyReport,
}

/// What a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// A structural mutation and the placement changes it caused.
    Mutation(Vec<Effect>),
    /// `Downtime` ran a repartitioning pass.
    Repartition(RepartitionReport),
}

/// A sharded social graph driven by trace commands.
///
/// Mutations go straight to the engine. `Downtime` runs the configured
/// repartitioning strategy and replays its plan.
#[derive(Debug)]
pub struct ShardedGraph {
    engine: Engine,
    config: ShardgraphConfig,
    /// Planner randomness, independent of the engine's placement stream.
    rng: StdRng,
}

impl ShardedGraph {
    /// Creates an empty graph with partitions `0..partitions`.
    pub fn new(config: ShardgraphConfig, partitions: u32) -> Result<Self> {
        let state = GraphState::new(config.engine.min_num_replicas);
        let mut graph = Self::from_state(config, state)?;
        for pid in 0..partitions {
            graph.engine.apply(Command::AddPartition(PartitionId::new(pid)))?;
        }
        Ok(graph)
    }

    /// Wraps an existing state. The state keeps its own replication floor.
    pub fn from_state(config: ShardgraphConfig, state: GraphState) -> Result<Self> {
        config.validate()?;
        let seed = config.engine.seed;
        info!(
            users = state.user_count(),
            partitions = state.partition_count(),
            strategy = ?config.repartition.strategy,
            "sharded graph ready"
        );
        Ok(Self {
            engine: Engine::with_seed(state, seed),
            config,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
        })
    }

    pub fn state(&self) -> &GraphState {
        self.engine.state()
    }

    pub fn config(&self) -> &ShardgraphConfig {
        &self.config
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Applies one trace command.
    pub fn apply(&mut self, cmd: Command) -> Result<Applied> {
        match cmd {
            Command::Downtime => Ok(Applied::Repartition(self.repartition()?)),
            _ => Ok(Applied::Mutation(self.engine.apply(cmd)?)),
        }
    }

    /// Applies a sequence of commands, stopping at the first error.
    ///
    /// Returns the reports of the repartitioning passes that ran.
    pub fn replay(
        &mut self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<RepartitionReport>> {
        let mut reports = Vec::new();
        for cmd in commands {
            if let Applied::Repartition(report) = self.apply(cmd)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Runs the configured strategy and applies its plan.
    pub fn repartition(&mut self) -> Result<RepartitionReport> {
        let strategy = self.config.repartition.strategy;
        let before = self.stats();
        info!(
            ?strategy,
            edge_cut = before.edge_cut,
            replicas = before.replicas,
            "repartition started"
        );

        let (plan, rounds, termination) = match strategy {
            Strategy::None => (
                LogicalPlan::unchanged(&LogicalProjection::from_state(self.state())),
                0,
                Termination::Converged,
            ),
            Strategy::External => (self.external_plan()?, 0, Termination::Converged),
            _ => {
                let outcome = self.search(strategy);
                (outcome.plan, outcome.rounds, outcome.termination)
            }
        };

        let applied = Applier::apply(&mut self.engine, &plan)?;
        let after = self.stats();
        info!(
            ?strategy,
            rounds,
            ?termination,
            moved = applied.moved,
            edge_cut = after.edge_cut,
            replicas = after.replicas,
            "repartition finished"
        );

        Ok(RepartitionReport {
            strategy,
            rounds,
            termination,
            before,
            after,
            applied,
        })
    }

    /// Replaces the assignment with one computed by `partitioner`.
    pub fn seed_from_external(
        &mut self,
        partitioner: &dyn ExternalPartitioner,
    ) -> Result<RepartitionReport> {
        let before = self.stats();
        let projection = LogicalProjection::from_state(self.state());
        let plan = MetisRepartitioner::new(partitioner).plan(&projection)?;
        let applied = Applier::apply(&mut self.engine, &plan)?;
        let after = self.stats();
        info!(moved = applied.moved, edge_cut = after.edge_cut, "seeded from external partitioner");

        Ok(RepartitionReport {
            strategy: Strategy::External,
            rounds: 0,
            termination: Termination::Converged,
            before,
            after,
            applied,
        })
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.state();
        let users = state.user_count();
        let replicas = state.replica_count();
        GraphStats {
            users,
            partitions: state.partition_count(),
            edge_cut: state.edge_cut(),
            replicas,
            replication_factor: if users == 0 {
                0.0
            } else {
                replicas as f64 / users as f64
            },
        }
    }

    fn search(&mut self, strategy: Strategy) -> SearchOutcome {
        let r = &self.config.repartition;
        let local = LocalSearchConfig {
            gamma: r.gamma,
            k: r.k,
            max_iterations: r.max_iterations,
        };
        let annealing = AnnealingConfig {
            initial_t: r.initial_t,
            delta_t: r.delta_t,
            alpha: r.alpha,
            k: r.k,
            restarts: r.restarts,
            incremental: r.incremental,
        };

        let state = self.engine.state();
        let projection = if strategy.is_replica_aware() {
            LogicalProjection::with_replicas(state)
        } else {
            LogicalProjection::from_state(state)
        };
        match strategy {
            Strategy::ReplicaLocalSearch => LocalSearch::new(local, ReplicaCost).run(&projection),
            Strategy::Annealing => {
                Annealing::new(annealing, EdgeCutCost).run(&projection, &mut self.rng)
            }
            Strategy::ReplicaAnnealing => {
                Annealing::new(annealing, ReplicaCost).run(&projection, &mut self.rng)
            }
            _ => LocalSearch::new(local, EdgeCutCost).run(&projection),
        }
    }

    fn external_plan(&self) -> Result<LogicalPlan> {
        let external = &self.config.external;
        fs::create_dir_all(&external.temp_dir).map_err(|source| {
            warn!(dir = %external.temp_dir.display(), %source, "cannot create partitioner scratch dir");
            shardgraph_repartition::RepartitionError::from(ExternalToolFailure::Io {
                path: external.temp_dir.clone(),
                source,
            })
        })?;
        let partitioner = MetisPartitioner::new(&external.executable, &external.temp_dir);
        let projection = LogicalProjection::from_state(self.state());
        Ok(MetisRepartitioner::new(partitioner).plan(&projection)?)
    }
}
