//! Replica bookkeeping on top of a logical projection.
//!
//! [`ReplicaScratch`] overlays pending master moves and replica-set edits on
//! a read-only projection and applies the same replica eligibility rules as
//! the kernel's physical moves. Only the compensating replica differs: the
//! kernel picks a random partition, the scratch picks the lowest absent id so
//! that costs are reproducible.

use std::collections::{BTreeMap, BTreeSet};

use shardgraph_types::{PartitionId, UserId};

use crate::projection::LogicalProjection;

/// Net effect of one or more logical moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaChanges {
    /// New master partition per moved user.
    pub masters: BTreeMap<UserId, PartitionId>,
    pub added: BTreeSet<(UserId, PartitionId)>,
    pub removed: BTreeSet<(UserId, PartitionId)>,
}

impl ReplicaChanges {
    /// Net change in the total replica count.
    pub fn delta(&self) -> isize {
        self.added.len() as isize - self.removed.len() as isize
    }

    /// Users gaining a replica on `pid`.
    pub fn added_on(&self, pid: PartitionId) -> impl Iterator<Item = UserId> + '_ {
        self.added
            .iter()
            .filter(move |(_, p)| *p == pid)
            .map(|(u, _)| *u)
    }

    /// Users losing their replica on `pid`.
    pub fn removed_on(&self, pid: PartitionId) -> impl Iterator<Item = UserId> + '_ {
        self.removed
            .iter()
            .filter(move |(_, p)| *p == pid)
            .map(|(u, _)| *u)
    }

    pub fn is_empty(&self) -> bool {
        self.masters.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Copy-on-write overlay of master moves and replica edits.
#[derive(Debug)]
pub struct ReplicaScratch<'a> {
    projection: &'a LogicalProjection,
    masters: BTreeMap<UserId, PartitionId>,
    replicas: BTreeMap<UserId, BTreeSet<PartitionId>>,
}

impl<'a> ReplicaScratch<'a> {
    pub fn new(projection: &'a LogicalProjection) -> Self {
        Self {
            projection,
            masters: BTreeMap::new(),
            replicas: BTreeMap::new(),
        }
    }

    pub fn master_of(&self, user: UserId) -> Option<PartitionId> {
        self.masters
            .get(&user)
            .copied()
            .or_else(|| self.projection.partition_of(user))
    }

    pub fn replicas_of(&self, user: UserId) -> &BTreeSet<PartitionId> {
        self.replicas
            .get(&user)
            .unwrap_or_else(|| self.projection.replicas_of(user))
    }

    fn is_present(&self, user: UserId, pid: PartitionId) -> bool {
        self.master_of(user) == Some(pid) || self.replicas_of(user).contains(&pid)
    }

    fn has_friend_mastered_on(
        &self,
        user: UserId,
        pid: PartitionId,
        excluding: Option<UserId>,
    ) -> bool {
        self.projection
            .friends(user)
            .iter()
            .any(|f| Some(*f) != excluding && self.master_of(*f) == Some(pid))
    }

    fn removable(&self, user: UserId, pid: PartitionId) -> bool {
        let replicas = self.replicas_of(user);
        replicas.contains(&pid)
            && !self.has_friend_mastered_on(user, pid, None)
            && replicas.len() > self.projection.min_num_replicas()
    }

    fn replicas_mut(&mut self, user: UserId) -> &mut BTreeSet<PartitionId> {
        let projection = self.projection;
        self.replicas
            .entry(user)
            .or_insert_with(|| projection.replicas_of(user).clone())
    }

    fn lowest_absent_partition(&self, user: UserId) -> Option<PartitionId> {
        self.projection
            .partitions()
            .find(|p| !self.is_present(user, *p))
    }

    /// Moves the master of `user` to `to`, adding and deleting replicas the
    /// way a physical relocation does.
    pub fn move_user(&mut self, user: UserId, to: PartitionId) {
        let Some(from) = self.master_of(user) else {
            return;
        };
        if from == to {
            return;
        }
        let projection = self.projection;
        let min = projection.min_num_replicas();
        let friends = projection.friends(user);

        let replicate_at_dest: BTreeSet<UserId> = friends
            .iter()
            .copied()
            .filter(|f| !self.is_present(*f, to))
            .collect();
        let delete_at_source: BTreeSet<UserId> = friends
            .iter()
            .copied()
            .filter(|f| {
                let count =
                    self.replicas_of(*f).len() + usize::from(replicate_at_dest.contains(f));
                self.replicas_of(*f).contains(&from)
                    && !self.has_friend_mastered_on(*f, from, Some(user))
                    && count > min
            })
            .collect();

        self.masters.insert(user, to);

        if self.has_friend_mastered_on(user, from, None) {
            self.replicas_mut(user).insert(from);
        }
        for friend in replicate_at_dest {
            if !self.is_present(friend, to) {
                self.replicas_mut(friend).insert(to);
            }
        }
        if self.replicas_of(user).contains(&to) {
            if self.replicas_of(user).len() <= min
                && let Some(pid) = self.lowest_absent_partition(user)
            {
                self.replicas_mut(user).insert(pid);
            }
            self.replicas_mut(user).remove(&to);
        }
        for friend in delete_at_source {
            if self.removable(friend, from) {
                self.replicas_mut(friend).remove(&from);
            }
        }
    }

    /// Net changes relative to the underlying projection.
    pub fn into_changes(self) -> ReplicaChanges {
        let projection = self.projection;
        let masters = self
            .masters
            .into_iter()
            .filter(|(u, p)| projection.partition_of(*u) != Some(*p))
            .collect();
        let mut added = BTreeSet::new();
        let mut removed = BTreeSet::new();
        for (user, after) in self.replicas {
            let before = projection.replicas_of(user);
            added.extend(after.difference(before).map(|p| (user, *p)));
            removed.extend(before.difference(&after).map(|p| (user, *p)));
        }
        ReplicaChanges {
            masters,
            added,
            removed,
        }
    }
}

/// Replica changes of moving the master of `user` to `to`.
pub fn get_move_changes(
    projection: &LogicalProjection,
    user: UserId,
    to: PartitionId,
) -> ReplicaChanges {
    let mut scratch = ReplicaScratch::new(projection);
    scratch.move_user(user, to);
    scratch.into_changes()
}

/// Replica changes of exchanging the masters of `u` and `v`.
///
/// `u` moves first, then `v`; the result is the net difference, so a
/// replica added by the first move and deleted by the second cancels out.
pub fn get_swap_changes(projection: &LogicalProjection, u: UserId, v: UserId) -> ReplicaChanges {
    let (Some(pu), Some(pv)) = (projection.partition_of(u), projection.partition_of(v)) else {
        return ReplicaChanges::default();
    };
    let mut scratch = ReplicaScratch::new(projection);
    scratch.move_user(u, pv);
    scratch.move_user(v, pu);
    scratch.into_changes()
}

#[cfg(test)]
mod tests {
    use shardgraph_types::FriendshipMap;

    use super::*;
    use crate::projection::ReplicaSets;

    fn uid(id: u64) -> UserId {
        UserId::new(id)
    }

    fn pid(id: u32) -> PartitionId {
        PartitionId::new(id)
    }

    /// Masters {P0: 1 2, P1: 3 4, P2: 5}, `min = 1`, edge 1-3 recorded.
    fn projection() -> LogicalProjection {
        let mut friendships = FriendshipMap::new();
        friendships.insert(uid(1), [uid(3)].into_iter().collect());
        friendships.insert(uid(3), [uid(1)].into_iter().collect());
        let assignment = [
            (uid(1), pid(0)),
            (uid(2), pid(0)),
            (uid(3), pid(1)),
            (uid(4), pid(1)),
            (uid(5), pid(2)),
        ]
        .into_iter()
        .collect();
        let replicas: ReplicaSets = [
            (uid(1), [pid(1), pid(2)].into_iter().collect()),
            (uid(2), [pid(1)].into_iter().collect()),
            (uid(3), [pid(0)].into_iter().collect()),
            (uid(4), [pid(2)].into_iter().collect()),
            (uid(5), [pid(0)].into_iter().collect()),
        ]
        .into_iter()
        .collect();
        LogicalProjection::from_parts(
            friendships,
            assignment,
            &[pid(0), pid(1), pid(2)],
            Some(replicas),
            1,
        )
    }

    #[test]
    fn move_drops_redundant_destination_replica() {
        let projection = projection();
        let changes = get_move_changes(&projection, uid(1), pid(1));

        assert_eq!(changes.masters.get(&uid(1)), Some(&pid(1)));
        assert!(changes.removed.contains(&(uid(1), pid(1))));
        assert!(changes.added.is_empty());
        // 3 keeps its replica on P0 because of the floor
        assert!(!changes.removed.contains(&(uid(3), pid(0))));
        assert_eq!(changes.delta(), -1);
    }

    #[test]
    fn move_compensates_on_lowest_absent_partition() {
        let projection = projection();
        let changes = get_move_changes(&projection, uid(3), pid(0));

        // 3's only replica is on P0; the compensating one goes to P1, the
        // partition it just left
        assert_eq!(changes.added_on(pid(1)).collect::<Vec<_>>(), vec![uid(3)]);
        assert_eq!(changes.removed_on(pid(0)).collect::<Vec<_>>(), vec![uid(3)]);
        // 1 no longer needs a replica where 3 used to be
        assert_eq!(changes.removed_on(pid(1)).collect::<Vec<_>>(), vec![uid(1)]);
        assert_eq!(changes.delta(), -1);
    }

    #[test]
    fn swap_changes_cover_both_moves() {
        let projection = projection();
        let changes = get_swap_changes(&projection, uid(1), uid(4));

        assert_eq!(changes.masters.get(&uid(1)), Some(&pid(1)));
        assert_eq!(changes.masters.get(&uid(4)), Some(&pid(0)));
        // 1 lands next to its friend 3 and 4 has no friends to serve
        assert_eq!(
            changes.removed.iter().copied().collect::<Vec<_>>(),
            vec![(uid(1), pid(1))]
        );
        assert!(changes.added.is_empty());
    }

    #[test]
    fn swap_with_unknown_user_is_empty() {
        let projection = projection();
        assert!(get_swap_changes(&projection, uid(1), uid(99)).is_empty());
    }

    #[test]
    fn apply_changes_updates_replica_loads() {
        let mut projection = projection();
        let before = projection.replica_count();
        let changes = get_move_changes(&projection, uid(1), pid(1));

        projection.apply_changes(&changes);

        assert_eq!(projection.partition_of(uid(1)), Some(pid(1)));
        assert_eq!(projection.replica_count(), before - 1);
        assert!(!projection.replicas_of(uid(1)).contains(&pid(1)));
    }
}
