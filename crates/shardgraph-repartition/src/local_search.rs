//! Gain-based two-stage local search.
//!
//! Each round runs two stages. The first only considers moves to a
//! higher-numbered partition, the second only moves to a lower-numbered one,
//! so two partitions never trade the same users back and forth within a
//! round. Within a stage every user proposes its best balanced destination,
//! each source partition lets through its top `k` proposals, and the
//! survivors are admitted best first while no destination overflows and no
//! source drains below the balance bounds. All admitted moves are applied
//! together.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shardgraph_types::{PartitionId, UserId};
use tracing::debug;

use crate::cost::CostModel;
use crate::plan::{LogicalPlan, SearchOutcome, Termination};
use crate::projection::LogicalProjection;

/// Parameters of the local search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalSearchConfig {
    /// Load factor bound. A destination may not exceed `gamma` times the
    /// average load; a source below `2 - gamma` times the average is frozen.
    pub gamma: f64,
    /// Moves allowed out of each partition per stage.
    pub k: usize,
    /// Round cap.
    pub max_iterations: usize,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            gamma: 1.5,
            k: 3,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn admits(self, from: PartitionId, to: PartitionId) -> bool {
        match self {
            Direction::Up => to > from,
            Direction::Down => to < from,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    gain: i64,
    user: UserId,
    from: PartitionId,
    to: PartitionId,
}

impl Candidate {
    /// Highest gain first, then destination, source and user ascending.
    fn rank(&self) -> (Reverse<i64>, PartitionId, PartitionId, UserId) {
        (Reverse(self.gain), self.to, self.from, self.user)
    }
}

/// Two-stage local search over a cost model.
#[derive(Debug, Clone)]
pub struct LocalSearch<C> {
    config: LocalSearchConfig,
    cost: C,
}

impl<C: CostModel> LocalSearch<C> {
    pub fn new(config: LocalSearchConfig, cost: C) -> Self {
        Self { config, cost }
    }

    pub fn config(&self) -> &LocalSearchConfig {
        &self.config
    }

    /// Runs rounds until one moves nobody or the round cap is hit.
    ///
    /// The cost never increases from one stage to the next.
    pub fn run(&self, projection: &LogicalProjection) -> SearchOutcome {
        let initial_cost = self.cost.cost(projection);
        let mut current = projection.clone();
        let mut rounds = 0;
        let mut termination = Termination::Exhausted;

        while rounds < self.config.max_iterations {
            rounds += 1;
            let moved =
                self.stage(&mut current, Direction::Up) + self.stage(&mut current, Direction::Down);
            debug!(round = rounds, moved, cost = self.cost.cost(&current), "local search round");
            if moved == 0 {
                termination = Termination::Converged;
                break;
            }
        }

        let final_cost = self.cost.cost(&current);

        // Postcondition: the search never makes things worse
        assert!(
            final_cost <= initial_cost,
            "local search raised cost from {initial_cost} to {final_cost}"
        );

        SearchOutcome {
            plan: LogicalPlan::diff(projection, &current),
            rounds,
            termination,
            initial_cost,
            final_cost,
        }
    }

    /// Applies one stage and returns the number of users moved.
    fn stage(&self, projection: &mut LogicalProjection, direction: Direction) -> usize {
        let candidates = self.candidates(projection, direction);
        if candidates.is_empty() {
            return 0;
        }

        let before = self.cost.cost(projection);
        let snapshot = projection.clone();
        for candidate in &candidates {
            self.cost
                .apply_move(projection, candidate.user, candidate.to);
        }
        if self.cost.cost(projection) <= before {
            return candidates.len();
        }

        // Proposals that were each profitable alone hurt together. Fall back
        // to applying them one by one while they still pay off.
        *projection = snapshot;
        let mut moved = 0;
        for candidate in &candidates {
            if self.cost.gain(projection, candidate.user, candidate.to) > 0 {
                self.cost
                    .apply_move(projection, candidate.user, candidate.to);
                moved += 1;
            }
        }
        moved
    }

    /// Best balanced proposal per user, then the top `k` per source.
    fn candidates(&self, projection: &LogicalProjection, direction: Direction) -> Vec<Candidate> {
        let average = projection.average_load();
        let ceiling = self.config.gamma * average;
        let floor = (2.0 - self.config.gamma) * average;

        let mut by_source: BTreeMap<PartitionId, Vec<Candidate>> = BTreeMap::new();
        for user in projection.users() {
            let Some(from) = projection.partition_of(user) else {
                continue;
            };
            if (projection.load(from) as f64 - 1.0) < floor {
                continue;
            }

            let mut best: Option<Candidate> = None;
            for to in projection.partitions() {
                if !direction.admits(from, to) || projection.load(to) as f64 + 1.0 > ceiling {
                    continue;
                }
                let gain = self.cost.gain(projection, user, to);
                if best.is_none_or(|b| gain > b.gain) {
                    best = Some(Candidate {
                        gain,
                        user,
                        from,
                        to,
                    });
                }
            }
            if let Some(candidate) = best.filter(|c| c.gain > 0) {
                by_source.entry(from).or_default().push(candidate);
            }
        }

        let mut shortlist: Vec<Candidate> = by_source
            .into_values()
            .flat_map(|mut proposals| {
                proposals.sort_by_key(Candidate::rank);
                proposals.truncate(self.config.k);
                proposals
            })
            .collect();
        shortlist.sort_by_key(Candidate::rank);

        // Proposals land together, so admit them against running totals
        let mut arrivals: BTreeMap<PartitionId, usize> = BTreeMap::new();
        let mut departures: BTreeMap<PartitionId, usize> = BTreeMap::new();
        shortlist.retain(|c| {
            let incoming = arrivals.get(&c.to).copied().unwrap_or(0);
            let outgoing = departures.get(&c.from).copied().unwrap_or(0);
            let to_load = (projection.load(c.to) + incoming + 1) as f64;
            let from_load = projection.load(c.from) as f64 - outgoing as f64 - 1.0;
            if to_load > ceiling || from_load < floor {
                return false;
            }
            *arrivals.entry(c.to).or_default() += 1;
            *departures.entry(c.from).or_default() += 1;
            true
        });
        shortlist
    }
}

#[cfg(test)]
mod tests {
    use shardgraph_types::FriendshipMap;

    use super::*;
    use crate::cost::{EdgeCutCost, ReplicaCost};

    fn uid(id: u64) -> UserId {
        UserId::new(id)
    }

    fn pid(id: u32) -> PartitionId {
        PartitionId::new(id)
    }

    fn friendships(edges: &[(u64, u64)]) -> FriendshipMap {
        let mut map = FriendshipMap::new();
        for (a, b) in edges {
            map.entry(uid(*a)).or_default().insert(uid(*b));
            map.entry(uid(*b)).or_default().insert(uid(*a));
        }
        map
    }

    /// Two 4-cliques, each with one member placed on the other side.
    fn swapped_cliques() -> LogicalProjection {
        let mut edges = Vec::new();
        for group in [[1, 2, 3, 4], [5, 6, 7, 8]] {
            for (i, a) in group.iter().enumerate() {
                for b in &group[i + 1..] {
                    edges.push((*a, *b));
                }
            }
        }
        let assignment = [(1, 0), (2, 0), (3, 0), (8, 0), (5, 1), (6, 1), (7, 1), (4, 1)]
            .into_iter()
            .map(|(u, p)| (uid(u), pid(p)))
            .collect();
        LogicalProjection::from_parts(friendships(&edges), assignment, &[pid(0), pid(1)], None, 0)
    }

    fn config(gamma: f64) -> LocalSearchConfig {
        LocalSearchConfig {
            gamma,
            k: 3,
            max_iterations: 10,
        }
    }

    #[test]
    fn repairs_misplaced_clique_members() {
        let projection = swapped_cliques();
        assert_eq!(projection.edge_cut(), 6);

        let outcome = LocalSearch::new(config(1.5), EdgeCutCost).run(&projection);

        assert_eq!(outcome.initial_cost, 6);
        assert_eq!(outcome.final_cost, 0);
        assert_eq!(outcome.termination, Termination::Converged);
        let moved: Vec<UserId> = outcome.plan.moves().iter().map(|m| m.user).collect();
        assert_eq!(moved, vec![uid(4), uid(8)]);
    }

    #[test]
    fn tight_balance_freezes_everything() {
        // With gamma = 1 every destination is full and nobody may leave
        let projection = swapped_cliques();
        let outcome = LocalSearch::new(config(1.0), EdgeCutCost).run(&projection);

        assert_eq!(outcome.final_cost, outcome.initial_cost);
        assert!(outcome.plan.moves().is_empty());
        assert_eq!(outcome.rounds, 1);
    }

    #[test]
    fn zero_iteration_cap_is_exhausted() {
        let projection = swapped_cliques();
        let outcome = LocalSearch::new(
            LocalSearchConfig {
                max_iterations: 0,
                ..config(1.5)
            },
            EdgeCutCost,
        )
        .run(&projection);

        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(outcome.rounds, 0);
        assert!(outcome.plan.is_empty());
    }

    #[test]
    fn candidates_respect_direction_and_k() {
        let projection = swapped_cliques();
        let search = LocalSearch::new(
            LocalSearchConfig {
                k: 1,
                ..config(2.0)
            },
            EdgeCutCost,
        );

        let up = search.candidates(&projection, Direction::Up);
        assert_eq!(up.len(), 1);
        assert_eq!((up[0].user, up[0].to, up[0].gain), (uid(8), pid(1), 3));

        let down = search.candidates(&projection, Direction::Down);
        assert_eq!(down.len(), 1);
        assert_eq!((down[0].user, down[0].to, down[0].gain), (uid(4), pid(0), 3));
    }

    /// Two hubs on P0, each befriended by every user of one crowded partition.
    fn crowded_spokes() -> LogicalProjection {
        let mut edges = Vec::new();
        let mut assignment = vec![(100, 0), (200, 0)];
        for u in 1..=4 {
            edges.push((u, 100));
            assignment.push((u, 1));
        }
        for u in 5..=8 {
            edges.push((u, 200));
            assignment.push((u, 2));
        }
        let assignment = assignment
            .into_iter()
            .map(|(u, p)| (uid(u), pid(p)))
            .collect();
        LogicalProjection::from_parts(
            friendships(&edges),
            assignment,
            &[pid(0), pid(1), pid(2)],
            None,
            0,
        )
    }

    fn loads_of(plan: &LogicalPlan) -> BTreeMap<PartitionId, usize> {
        let mut loads = BTreeMap::new();
        for pid in plan.target_assignment().values() {
            *loads.entry(*pid).or_insert(0) += 1;
        }
        loads
    }

    #[test]
    fn many_sources_cannot_overfill_one_destination() {
        let projection = crowded_spokes();
        // 10 users on 3 partitions: ceiling 4.0, floor about 2.67
        let gamma = 1.2;
        let ceiling = gamma * projection.average_load();
        let floor = (2.0 - gamma) * projection.average_load();
        let search = LocalSearch::new(
            LocalSearchConfig {
                gamma,
                k: 3,
                max_iterations: 1,
            },
            EdgeCutCost,
        );

        let down = search.candidates(&projection, Direction::Down);
        assert_eq!(down.len(), 2);
        assert!(down.iter().all(|c| c.to == pid(0)));

        for max_iterations in [1, 10] {
            let outcome = LocalSearch::new(
                LocalSearchConfig {
                    max_iterations,
                    ..*search.config()
                },
                EdgeCutCost,
            )
            .run(&projection);
            for (partition, load) in loads_of(&outcome.plan) {
                assert!(load as f64 <= ceiling, "{partition} overweight: {load}");
                assert!(load as f64 >= floor.floor(), "{partition} drained: {load}");
            }
            assert!(outcome.final_cost < outcome.initial_cost);
        }
    }

    #[test]
    fn replica_search_never_adds_replicas() {
        let edges = [(1, 2), (2, 3), (3, 4), (4, 1)];
        let assignment = [(1, 0), (2, 1), (3, 0), (4, 1)]
            .into_iter()
            .map(|(u, p)| (uid(u), pid(p)))
            .collect();
        let replicas = [
            (uid(1), [pid(1)].into_iter().collect()),
            (uid(2), [pid(0)].into_iter().collect()),
            (uid(3), [pid(1)].into_iter().collect()),
            (uid(4), [pid(0)].into_iter().collect()),
        ]
        .into_iter()
        .collect();
        let projection = LogicalProjection::from_parts(
            friendships(&edges),
            assignment,
            &[pid(0), pid(1), pid(2)],
            Some(replicas),
            1,
        );

        let outcome = LocalSearch::new(config(2.0), ReplicaCost).run(&projection);

        assert!(outcome.final_cost <= outcome.initial_cost);
        assert!(outcome.plan.target_replicas().is_some());
    }
}
