//! Unit tests for the shardgraph facade

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use proptest::prelude::{Just, ProptestConfig, any, prop, prop_assert, prop_oneof, proptest};
use proptest::strategy::Strategy as _;
use shardgraph_config::{ShardgraphConfig, Strategy};
use shardgraph_kernel::{Command, KernelError, invariants};
use shardgraph_repartition::{ExternalPartitioner, ExternalToolFailure, RepartitionError};
use shardgraph_types::{FriendshipMap, PartitionId, UserId};
use test_case::test_case;

use crate::error::ShardgraphError;
use crate::graph::{Applied, ShardedGraph};

// ============================================================================
// Test Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn uid(id: u64) -> UserId {
    UserId::new(id)
}

fn pid(id: u32) -> PartitionId {
    PartitionId::new(id)
}

fn config(strategy: Strategy) -> ShardgraphConfig {
    let mut config = ShardgraphConfig::default();
    config.engine.min_num_replicas = 1;
    config.engine.seed = 9;
    config.repartition.strategy = strategy;
    config.repartition.initial_t = 1.3;
    config.repartition.delta_t = 0.1;
    config.repartition.restarts = 2;
    config
}

/// Nine users in three triangles, joined in a ring, then a downtime.
fn clustered_trace() -> Vec<Command> {
    let mut trace: Vec<Command> = (1..=9).map(|u| Command::AddUser(uid(u))).collect();
    for base in [0u64, 3, 6] {
        trace.push(Command::Befriend(uid(base + 1), uid(base + 2)));
        trace.push(Command::Befriend(uid(base + 2), uid(base + 3)));
        trace.push(Command::Befriend(uid(base + 1), uid(base + 3)));
    }
    trace.push(Command::Befriend(uid(3), uid(4)));
    trace.push(Command::Befriend(uid(6), uid(7)));
    trace.push(Command::Downtime);
    trace
}

fn assert_valid(graph: &ShardedGraph) {
    if let Err(violation) = invariants::check(graph.state()) {
        panic!("invariant violated: {violation}");
    }
}

/// Sends user `id` to index `id % k`.
struct ModuloPartitioner;

impl ExternalPartitioner for ModuloPartitioner {
    fn partition(
        &self,
        users: &[UserId],
        _friendships: &FriendshipMap,
        k: usize,
    ) -> Result<BTreeMap<UserId, usize>, ExternalToolFailure> {
        Ok(users
            .iter()
            .map(|u| (*u, (u.as_u64() % k as u64) as usize))
            .collect())
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn new_graph_has_requested_partitions() {
    init_tracing();
    let graph = ShardedGraph::new(config(Strategy::LocalSearch), 4).unwrap();

    let stats = graph.stats();
    assert_eq!(stats.partitions, 4);
    assert_eq!(stats.users, 0);
    assert_eq!(stats.replication_factor, 0.0);
    assert_eq!(graph.state().partition_ids(), vec![pid(0), pid(1), pid(2), pid(3)]);
}

#[test]
fn invalid_config_is_rejected() {
    let mut bad = config(Strategy::Annealing);
    bad.repartition.restarts = 0;

    let err = ShardedGraph::new(bad, 3).unwrap_err();

    assert!(matches!(err, ShardgraphError::Config(_)));
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn mutations_return_effects() {
    let mut graph = ShardedGraph::new(config(Strategy::None), 3).unwrap();

    let applied = graph.apply(Command::AddUser(uid(1))).unwrap();

    let Applied::Mutation(effects) = applied else {
        panic!("expected a mutation");
    };
    assert!(!effects.is_empty());
    assert_eq!(graph.stats().replicas, 1);
}

#[test]
fn unknown_user_is_not_found() {
    let mut graph = ShardedGraph::new(config(Strategy::None), 3).unwrap();
    graph.apply(Command::AddUser(uid(1))).unwrap();

    let err = graph.apply(Command::Befriend(uid(1), uid(2))).unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(
        err,
        ShardgraphError::Kernel(KernelError::UserNotFound(u)) if u == uid(2)
    ));
}

#[test]
fn partition_lifecycle_through_commands() {
    init_tracing();
    let mut graph = ShardedGraph::new(config(Strategy::None), 3).unwrap();
    graph.replay(clustered_trace()).unwrap();

    graph.apply(Command::AddPartition(pid(7))).unwrap();
    graph.apply(Command::RemovePartition(pid(0))).unwrap();

    assert_valid(&graph);
    assert_eq!(graph.stats().partitions, 3);
    assert_eq!(graph.stats().users, 9);
    assert!(graph.state().partition_ids().contains(&pid(7)));
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[test]
fn partition_changes_are_logged_once() {
    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut graph = ShardedGraph::new(config(Strategy::None), 3).unwrap();
        graph.apply(Command::AddPartition(pid(5))).unwrap();
        graph.apply(Command::RemovePartition(pid(5))).unwrap();
    });

    let text = logs.text();
    // Three partitions at construction plus the explicit one
    assert_eq!(text.matches("partition added").count(), 4);
    assert_eq!(text.matches("partition removed").count(), 1);
}

// ============================================================================
// Repartitioning
// ============================================================================

#[test_case(Strategy::LocalSearch; "local search")]
#[test_case(Strategy::Annealing; "annealing")]
fn edge_cut_strategies_never_raise_the_cut(strategy: Strategy) {
    init_tracing();
    let mut graph = ShardedGraph::new(config(strategy), 3).unwrap();

    let reports = graph.replay(clustered_trace()).unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.strategy, strategy);
    assert!(report.after.edge_cut <= report.before.edge_cut);
    assert_eq!(report.after.users, 9);
    assert_valid(&graph);
}

#[test_case(Strategy::ReplicaLocalSearch; "replica local search")]
#[test_case(Strategy::ReplicaAnnealing; "replica annealing")]
fn replica_strategies_keep_invariants(strategy: Strategy) {
    init_tracing();
    let mut graph = ShardedGraph::new(config(strategy), 3).unwrap();

    let reports = graph.replay(clustered_trace()).unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].after.replicas >= 9);
    assert_valid(&graph);
}

#[test]
fn disabled_strategy_changes_nothing() {
    let mut graph = ShardedGraph::new(config(Strategy::None), 3).unwrap();
    let mut trace = clustered_trace();
    trace.pop();
    graph.replay(trace).unwrap();
    let masters = graph.state().masters_map();

    let report = graph.repartition().unwrap();

    assert_eq!(report.applied.moved, 0);
    assert_eq!(report.before.edge_cut, report.after.edge_cut);
    // Only surplus replicas may go
    assert!(report.after.replicas <= report.before.replicas);
    assert_eq!(graph.state().masters_map(), masters);
}

#[test]
fn repartition_report_serializes() {
    let mut graph = ShardedGraph::new(config(Strategy::LocalSearch), 3).unwrap();
    let reports = graph.replay(clustered_trace()).unwrap();

    let json = serde_json::to_value(&reports[0]).unwrap();

    assert_eq!(json["strategy"], "local-search");
    assert_eq!(json["after"]["users"], 9);
}

#[test]
fn seeding_from_external_assignment() {
    init_tracing();
    let mut graph = ShardedGraph::new(config(Strategy::None), 3).unwrap();
    let mut trace = clustered_trace();
    trace.pop();
    graph.replay(trace).unwrap();

    let report = graph.seed_from_external(&ModuloPartitioner).unwrap();

    assert_eq!(report.strategy, Strategy::External);
    for u in 1..=9u64 {
        let expected = pid((u % 3) as u32);
        assert_eq!(graph.state().master_partition_of(uid(u)), Some(expected));
    }
    assert_valid(&graph);
}

#[test]
fn missing_external_tool_fails_without_changes() {
    let scratch = tempfile::tempdir().unwrap();
    let mut cfg = config(Strategy::External);
    cfg.external.executable = scratch.path().join("not-installed");
    cfg.external.temp_dir = scratch.path().join("tmp");
    let mut graph = ShardedGraph::new(cfg, 3).unwrap();
    let mut trace = clustered_trace();
    trace.pop();
    graph.replay(trace).unwrap();
    let masters = graph.state().masters_map();

    let err = graph.apply(Command::Downtime).unwrap_err();

    assert!(matches!(
        err,
        ShardgraphError::Repartition(RepartitionError::External(ExternalToolFailure::Spawn { .. }))
    ));
    assert_eq!(graph.state().masters_map(), masters);
}

#[cfg(unix)]
#[test]
fn external_strategy_runs_the_configured_tool() {
    use std::os::unix::fs::PermissionsExt;

    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let exe = scratch.path().join("round-robin.sh");
    // Vertex i goes to part (i - 1) mod k
    std::fs::write(
        &exe,
        "#!/bin/sh\nn=$(head -n 1 \"$1\" | cut -d ' ' -f 1)\ni=0\nwhile [ $i -lt $n ]; do echo $((i % $2)); i=$((i + 1)); done > \"$1.part.$2\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut cfg = config(Strategy::External);
    cfg.external.executable = exe;
    cfg.external.temp_dir = scratch.path().join("tmp");
    let mut graph = ShardedGraph::new(cfg, 3).unwrap();

    let reports = graph.replay(clustered_trace()).unwrap();

    assert_eq!(reports[0].strategy, Strategy::External);
    // Users 1..=9 are vertices 1..=9
    for u in 1..=9u64 {
        let expected = pid(((u - 1) % 3) as u32);
        assert_eq!(graph.state().master_partition_of(uid(u)), Some(expected));
    }
    assert_valid(&graph);
}

// ============================================================================
// Property Tests
// ============================================================================

fn arb_command() -> impl proptest::strategy::Strategy<Value = Command> {
    prop_oneof![
        3 => (1u64..=12).prop_map(|u| Command::AddUser(uid(u))),
        1 => (1u64..=12).prop_map(|u| Command::RemoveUser(uid(u))),
        5 => (1u64..=12, 1u64..=12).prop_map(|(a, b)| Command::Befriend(uid(a), uid(b))),
        2 => (1u64..=12, 1u64..=12).prop_map(|(a, b)| Command::Unfriend(uid(a), uid(b))),
        1 => Just(Command::Downtime),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn traces_with_downtime_keep_invariants(
        commands in prop::collection::vec(arb_command(), 1..60),
        replica_aware in any::<bool>(),
    ) {
        let strategy = if replica_aware {
            Strategy::ReplicaLocalSearch
        } else {
            Strategy::LocalSearch
        };
        let mut graph = ShardedGraph::new(config(strategy), 4).unwrap();
        for cmd in commands {
            // Unknown ids and self friendships are expected to fail
            let _ = graph.apply(cmd);
            prop_assert!(invariants::check(graph.state()).is_ok());
        }
    }
}
