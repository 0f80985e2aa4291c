//! Property tests: random operation sequences never break the placement
//! invariants, and rejected operations never change the state.

use proptest::prelude::*;
use shardgraph_types::{PartitionId, UserId};

use crate::engine::Engine;
use crate::error::KernelError;
use crate::invariants;
use crate::state::GraphState;

const MAX_USER: u64 = 12;
const MAX_PARTITION: u32 = 6;

#[derive(Debug, Clone, Copy)]
enum Op {
    AddUser(u64),
    RemoveUser(u64),
    Befriend(u64, u64),
    Unfriend(u64, u64),
    AddPartition(u32),
    RemovePartition(u32),
    Relocate(u64, u32),
    AddReplica(u64, u32),
    RemoveReplica(u64, u32),
    Promote(u64, u32),
    Repair,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let user = 0..MAX_USER;
    let partition = 0..MAX_PARTITION;
    prop_oneof![
        4 => user.clone().prop_map(Op::AddUser),
        1 => user.clone().prop_map(Op::RemoveUser),
        6 => (user.clone(), user.clone()).prop_map(|(a, b)| Op::Befriend(a, b)),
        2 => (user.clone(), user.clone()).prop_map(|(a, b)| Op::Unfriend(a, b)),
        1 => partition.clone().prop_map(Op::AddPartition),
        1 => partition.clone().prop_map(Op::RemovePartition),
        2 => (user.clone(), partition.clone()).prop_map(|(u, p)| Op::Relocate(u, p)),
        1 => (user.clone(), partition.clone()).prop_map(|(u, p)| Op::AddReplica(u, p)),
        1 => (user.clone(), partition.clone()).prop_map(|(u, p)| Op::RemoveReplica(u, p)),
        1 => (user, partition).prop_map(|(u, p)| Op::Promote(u, p)),
        1 => Just(Op::Repair),
    ]
}

fn run(engine: &mut Engine, op: Op) -> Result<(), KernelError> {
    let u = UserId::new;
    let p = PartitionId::new;
    match op {
        Op::AddUser(a) => engine.add_user(u(a)).map(drop),
        Op::RemoveUser(a) => engine.remove_user(u(a)).map(drop),
        Op::Befriend(a, b) => engine.befriend(u(a), u(b)).map(drop),
        Op::Unfriend(a, b) => engine.unfriend(u(a), u(b)).map(drop),
        Op::AddPartition(x) => engine.add_partition_with_id(p(x)).map(drop),
        Op::RemovePartition(x) => engine.remove_partition(p(x)).map(drop),
        Op::Relocate(a, x) => engine.relocate_master(u(a), p(x)).map(drop),
        Op::AddReplica(a, x) => engine.add_replica(u(a), p(x)).map(drop),
        Op::RemoveReplica(a, x) => engine.remove_replica(u(a), p(x)).map(drop),
        Op::Promote(a, x) => engine.promote_replica_to_master(u(a), p(x)).map(drop),
        Op::Repair => {
            engine.repair_replication();
            Ok(())
        }
    }
}

fn seeded_engine(min: usize, partitions: u32, seed: u64) -> Engine {
    let mut engine = Engine::with_seed(GraphState::new(min), seed);
    for x in 0..partitions {
        engine
            .add_partition_with_id(PartitionId::new(x))
            .expect("fresh partition id");
    }
    engine
}

proptest! {
    #[test]
    fn random_operations_preserve_invariants(
        min in 0usize..3,
        partitions in 3u32..MAX_PARTITION,
        seed in any::<u64>(),
        ops in prop::collection::vec(arb_op(), 1..80),
    ) {
        let mut engine = seeded_engine(min, partitions, seed);

        for op in ops {
            let before = engine.state().clone();
            match run(&mut engine, op) {
                Ok(()) => {
                    let checked = invariants::check(engine.state());
                    prop_assert!(checked.is_ok(), "{:?} after {:?}", checked, op);
                }
                Err(_) => prop_assert_eq!(engine.state(), &before),
            }
        }
    }

    #[test]
    fn removed_partition_leaves_no_trace(
        seed in any::<u64>(),
        edges in prop::collection::vec((0..MAX_USER, 0..MAX_USER), 0..30),
        victim in 0u32..4,
    ) {
        let mut engine = seeded_engine(1, 4, seed);
        for a in 0..MAX_USER {
            engine.add_user(UserId::new(a)).expect("room for the floor");
        }
        for (a, b) in edges {
            if a != b {
                engine.befriend(UserId::new(a), UserId::new(b)).expect("known users");
            }
        }

        engine.remove_partition(PartitionId::new(victim)).expect("three partitions remain");

        let state = engine.state();
        let gone = PartitionId::new(victim);
        for (user, master) in state.users() {
            prop_assert_ne!(master, gone);
            let replicas = state.replica_partitions_of(user).expect("user has a master");
            prop_assert!(!replicas.contains(&gone));
            prop_assert!(replicas.len() >= 1);
        }
        prop_assert_eq!(state.user_count(), MAX_USER as usize);
        prop_assert!(invariants::check(state).is_ok());
    }

    #[test]
    fn replay_determinism(
        seed in any::<u64>(),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let replay = |ops: &[Op]| {
            let mut engine = seeded_engine(1, 4, seed);
            for op in ops {
                let _ = run(&mut engine, *op);
            }
            engine.into_state()
        };
        prop_assert_eq!(replay(&ops), replay(&ops));
    }
}
