//! Replays a logical plan through the engine.
//!
//! The searches work on a projection that does not maintain the placement
//! invariants. The applier turns a plan back into engine operations, so the
//! physical state ends up in the planned configuration with every invariant
//! re-established.

use serde::{Deserialize, Serialize};
use shardgraph_kernel::{
    BefriendingPolicy, Effect, Engine, GraphState, KernelError, invariants, rules,
};
use shardgraph_types::PartitionId;
use tracing::{debug, info};

use crate::error::RepartitionError;
use crate::plan::{LogicalPlan, Move};

/// Summary of an applied plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Masters relocated.
    pub moved: usize,
    pub replicas_added: usize,
    pub replicas_removed: usize,
    /// Cross-partition friendships afterwards.
    pub edge_cut: usize,
    /// Total replicas afterwards.
    pub replica_count: usize,
}

impl ApplyReport {
    fn record(&mut self, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::MasterMoved { .. } => self.moved += 1,
                Effect::ReplicaAdded { .. } => self.replicas_added += 1,
                Effect::ReplicaRemoved { .. } | Effect::ReplicaPromoted { .. } => {
                    self.replicas_removed += 1;
                }
                _ => {}
            }
        }
    }
}

/// Applies logical plans to an engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Applier;

impl Applier {
    /// Brings the engine into the configuration described by `plan`.
    ///
    /// Masters move first in ascending user order. Target replica sets are
    /// then reconciled, adding before removing and never dropping a replica
    /// the floor or a friend still needs. Finally replication is repaired.
    ///
    /// A plan that no longer matches the engine is rejected before any
    /// mutation.
    ///
    /// # Panics
    ///
    /// Panics if the resulting state fails the invariant checker.
    pub fn apply<R, P>(
        engine: &mut Engine<R, P>,
        plan: &LogicalPlan,
    ) -> Result<ApplyReport, RepartitionError>
    where
        R: rand::Rng,
        P: BefriendingPolicy,
    {
        let moves = plan.moves();
        Self::validate(engine.state(), &moves)?;

        let mut report = ApplyReport::default();
        for mv in &moves {
            let effects = engine.relocate_master(mv.user, mv.to)?;
            report.record(&effects);
        }

        if let Some(targets) = plan.target_replicas() {
            for (user, wanted) in targets {
                let Some(master) = engine.state().master_partition_of(*user) else {
                    continue;
                };
                for pid in wanted {
                    if *pid != master
                        && engine.state().partition_exists(*pid)
                        && !engine.state().has_replica(*user, *pid)
                    {
                        let effects = engine.add_replica(*user, *pid)?;
                        report.record(&effects);
                    }
                }
            }
            for (user, wanted) in targets {
                let surplus: Vec<PartitionId> = engine
                    .state()
                    .replica_partitions_of(*user)
                    .into_iter()
                    .flatten()
                    .filter(|pid| !wanted.contains(pid))
                    .copied()
                    .collect();
                for pid in surplus {
                    if rules::replica_removable(engine.state(), *user, pid) {
                        let effects = engine.remove_replica(*user, pid)?;
                        report.record(&effects);
                    }
                }
            }
        }

        let repairs = engine.repair_replication();
        debug!(repairs = repairs.len(), "replication repaired after plan");
        report.record(&repairs);

        if let Err(violation) = invariants::check(engine.state()) {
            panic!("plan application left an inconsistent state: {violation}");
        }

        report.edge_cut = engine.state().edge_cut();
        report.replica_count = engine.state().replica_count();
        info!(
            moved = report.moved,
            replicas_added = report.replicas_added,
            replicas_removed = report.replicas_removed,
            edge_cut = report.edge_cut,
            replica_count = report.replica_count,
            "plan applied"
        );
        Ok(report)
    }

    fn validate(state: &GraphState, moves: &[Move]) -> Result<(), RepartitionError> {
        for mv in moves {
            let actual = state.master_partition_of(mv.user);
            if actual != Some(mv.from) {
                return Err(RepartitionError::StalePlan {
                    user: mv.user,
                    expected: mv.from,
                    actual,
                });
            }
            if !state.partition_exists(mv.to) {
                return Err(KernelError::PartitionNotFound(mv.to).into());
            }
        }
        Ok(())
    }
}
