//! Cost models.
//!
//! A search is parameterised by what it optimises. [`EdgeCutCost`] counts
//! friendships that cross partitions and ignores replicas; [`ReplicaCost`]
//! counts replicas and moves them along with every master, using the same
//! eligibility rules as the kernel.

use shardgraph_types::{PartitionId, UserId};

use crate::projection::LogicalProjection;
use crate::scratch::{get_move_changes, get_swap_changes};

/// Whether a swap score is better when larger or when smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Maximize,
    Minimize,
}

/// Scores of a candidate swap before and after the exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapScores {
    pub old: f64,
    pub new: f64,
    pub objective: Objective,
}

impl SwapScores {
    /// Temperature-gated acceptance.
    ///
    /// A swap is accepted when the new score is no worse than the old one and
    /// still beats it once scaled by the temperature. With `temperature > 1`
    /// this admits sideways swaps; at `temperature = 1` only strict
    /// improvements pass. A worse state is never accepted.
    pub fn accepts(&self, temperature: f64) -> bool {
        match self.objective {
            Objective::Maximize => self.new >= self.old && self.new * temperature > self.old,
            Objective::Minimize => self.new <= self.old && self.new / temperature < self.old,
        }
    }

    /// Returns true if `self` is a better outcome than `other`.
    pub fn beats(&self, other: &SwapScores) -> bool {
        match self.objective {
            Objective::Maximize => self.new > other.new,
            Objective::Minimize => self.new < other.new,
        }
    }
}

/// What a search optimises.
pub trait CostModel: Send + Sync {
    /// Returns true if this model needs replica sets on the projection.
    fn tracks_replicas(&self) -> bool;

    /// Total cost of the projection. Lower is better.
    fn cost(&self, projection: &LogicalProjection) -> usize;

    /// Improvement from moving `user` to `to`. Positive is better.
    fn gain(&self, projection: &LogicalProjection, user: UserId, to: PartitionId) -> i64;

    fn apply_move(&self, projection: &mut LogicalProjection, user: UserId, to: PartitionId);

    /// Scores exchanging the partitions of `u` and `v`.
    fn swap_scores(
        &self,
        projection: &LogicalProjection,
        u: UserId,
        v: UserId,
        alpha: f64,
    ) -> SwapScores;

    fn apply_swap(&self, projection: &mut LogicalProjection, u: UserId, v: UserId);
}

// ============================================================================
// Edge cut
// ============================================================================

/// Minimises the number of friendships between partitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeCutCost;

impl CostModel for EdgeCutCost {
    fn tracks_replicas(&self) -> bool {
        false
    }

    fn cost(&self, projection: &LogicalProjection) -> usize {
        projection.edge_cut()
    }

    fn gain(&self, projection: &LogicalProjection, user: UserId, to: PartitionId) -> i64 {
        let Some(from) = projection.partition_of(user) else {
            return 0;
        };
        projection.friends_on(user, to) as i64 - projection.friends_on(user, from) as i64
    }

    fn apply_move(&self, projection: &mut LogicalProjection, user: UserId, to: PartitionId) {
        projection.set_master(user, to);
    }

    /// Friend colocation raised to `alpha`, summed over both users.
    fn swap_scores(
        &self,
        projection: &LogicalProjection,
        u: UserId,
        v: UserId,
        alpha: f64,
    ) -> SwapScores {
        let (Some(pu), Some(pv)) = (projection.partition_of(u), projection.partition_of(v)) else {
            return SwapScores {
                old: 0.0,
                new: 0.0,
                objective: Objective::Maximize,
            };
        };
        let linked = usize::from(projection.are_friends(u, v));
        let power = |n: usize| (n as f64).powf(alpha);

        let old = power(projection.friends_on(u, pu)) + power(projection.friends_on(v, pv));
        let new = power(projection.friends_on(u, pv) - linked)
            + power(projection.friends_on(v, pu) - linked);
        SwapScores {
            old,
            new,
            objective: Objective::Maximize,
        }
    }

    fn apply_swap(&self, projection: &mut LogicalProjection, u: UserId, v: UserId) {
        projection.swap_masters(u, v);
    }
}

// ============================================================================
// Replica count
// ============================================================================

/// Minimises the total number of replicas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaCost;

impl CostModel for ReplicaCost {
    fn tracks_replicas(&self) -> bool {
        true
    }

    fn cost(&self, projection: &LogicalProjection) -> usize {
        projection.replica_count()
    }

    /// Replicas deleted minus replicas created.
    fn gain(&self, projection: &LogicalProjection, user: UserId, to: PartitionId) -> i64 {
        -(get_move_changes(projection, user, to).delta() as i64)
    }

    fn apply_move(&self, projection: &mut LogicalProjection, user: UserId, to: PartitionId) {
        let changes = get_move_changes(projection, user, to);
        projection.apply_changes(&changes);
    }

    /// Replicas held by the two partitions, raised to `alpha`.
    fn swap_scores(
        &self,
        projection: &LogicalProjection,
        u: UserId,
        v: UserId,
        alpha: f64,
    ) -> SwapScores {
        let (Some(pu), Some(pv)) = (projection.partition_of(u), projection.partition_of(v)) else {
            return SwapScores {
                old: 0.0,
                new: 0.0,
                objective: Objective::Minimize,
            };
        };
        let held = projection.replica_load(pu) + projection.replica_load(pv);
        let after = held.saturating_add_signed(get_swap_changes(projection, u, v).delta());
        SwapScores {
            old: (held as f64).powf(alpha),
            new: (after as f64).powf(alpha),
            objective: Objective::Minimize,
        }
    }

    fn apply_swap(&self, projection: &mut LogicalProjection, u: UserId, v: UserId) {
        let changes = get_swap_changes(projection, u, v);
        projection.apply_changes(&changes);
    }
}

#[cfg(test)]
mod tests {
    use shardgraph_types::FriendshipMap;
    use test_case::test_case;

    use super::*;

    fn uid(id: u64) -> UserId {
        UserId::new(id)
    }

    fn pid(id: u32) -> PartitionId {
        PartitionId::new(id)
    }

    /// Two triangles {1,2,3} and {4,5,6} with 3 and 4 on the wrong side.
    fn crossed_triangles() -> LogicalProjection {
        let mut friendships = FriendshipMap::new();
        for (a, b) in [(1, 2), (2, 3), (1, 3), (4, 5), (5, 6), (4, 6)] {
            friendships.entry(uid(a)).or_default().insert(uid(b));
            friendships.entry(uid(b)).or_default().insert(uid(a));
        }
        let assignment = [
            (uid(1), pid(0)),
            (uid(2), pid(0)),
            (uid(4), pid(0)),
            (uid(3), pid(1)),
            (uid(5), pid(1)),
            (uid(6), pid(1)),
        ]
        .into_iter()
        .collect();
        LogicalProjection::from_parts(friendships, assignment, &[pid(0), pid(1)], None, 0)
    }

    #[test_case(Objective::Maximize, 3.0, 2.0, 1.0, true; "maximize strict improvement")]
    #[test_case(Objective::Maximize, 2.0, 2.0, 1.5, true; "maximize sideways while hot")]
    #[test_case(Objective::Maximize, 2.0, 2.0, 1.0, false; "maximize sideways when cold")]
    #[test_case(Objective::Maximize, 1.0, 2.0, 5.0, false; "maximize never accepts worse")]
    #[test_case(Objective::Minimize, 1.0, 2.0, 1.0, true; "minimize strict improvement")]
    #[test_case(Objective::Minimize, 2.0, 2.0, 1.5, true; "minimize sideways while hot")]
    #[test_case(Objective::Minimize, 3.0, 2.0, 5.0, false; "minimize never accepts worse")]
    fn acceptance(objective: Objective, new: f64, old: f64, temperature: f64, expected: bool) {
        let scores = SwapScores {
            old,
            new,
            objective,
        };
        assert_eq!(scores.accepts(temperature), expected);
    }

    #[test]
    fn edge_cut_gain_counts_friends() {
        let projection = crossed_triangles();
        // 3 has two friends on P0 and none on P1
        assert_eq!(EdgeCutCost.gain(&projection, uid(3), pid(0)), 2);
        // 1 has one friend on each side
        assert_eq!(EdgeCutCost.gain(&projection, uid(1), pid(1)), 0);
        assert_eq!(EdgeCutCost.gain(&projection, uid(2), pid(1)), 0);
    }

    #[test]
    fn edge_cut_swap_prefers_fixing_both_triangles() {
        let mut projection = crossed_triangles();
        assert_eq!(EdgeCutCost.cost(&projection), 4);

        let scores = EdgeCutCost.swap_scores(&projection, uid(3), uid(4), 2.0);
        assert!(scores.accepts(1.0));

        EdgeCutCost.apply_swap(&mut projection, uid(3), uid(4));
        assert_eq!(EdgeCutCost.cost(&projection), 0);
    }

    #[test]
    fn replica_cost_without_tracking_is_zero() {
        let projection = crossed_triangles();
        assert_eq!(ReplicaCost.cost(&projection), 0);
        assert!(ReplicaCost.tracks_replicas());
        assert!(!EdgeCutCost.tracks_replicas());
    }
}
