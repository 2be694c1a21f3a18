//! Fixed-capacity subpopulations.
//!
//! Each island holds at most `capacity` members, kept sorted best-first.
//! Ordering is total: fitness descending (via `total_cmp`, so NaN never
//! poisons a sort), with admission order breaking ties in favor of the
//! older member. A full island admits a newcomer only if it strictly
//! outranks the current worst, which then gets evicted.

use std::cmp::Ordering;

use evo_core::CandidateId;
use serde::{Deserialize, Serialize};

/// Island-resident view of a candidate: just enough to rank it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: CandidateId,
    pub fitness: f64,
    /// Database admission order. Lower is older.
    pub seq: u64,
}

impl Member {
    /// Strict ranking: higher fitness wins, equal fitness goes to the
    /// older member. Never returns true for two copies of the same member.
    pub fn ranks_above(&self, other: &Member) -> bool {
        match self.fitness.total_cmp(&other.fitness) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.seq < other.seq,
        }
    }
}

/// Outcome of offering a member to an island.
#[derive(Debug, Clone, PartialEq)]
pub enum IslandInsert {
    Accepted { evicted: Option<Member> },
    /// Island full and the newcomer did not outrank the current worst.
    RejectedInferior,
}

/// One subpopulation, sorted best-first at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Island {
    capacity: usize,
    members: Vec<Member>,
}

impl Island {
    pub fn new(capacity: usize) -> Self {
        Island {
            capacity,
            members: Vec::with_capacity(capacity),
        }
    }

    /// Offers `member` a slot. When full, the newcomer must strictly
    /// outrank the worst resident, which is evicted to make room.
    pub fn insert(&mut self, member: Member) -> IslandInsert {
        if self.members.len() >= self.capacity {
            let outranks_worst = match self.members.last() {
                Some(worst) => member.ranks_above(worst),
                None => false,
            };
            if !outranks_worst {
                return IslandInsert::RejectedInferior;
            }
            let evicted = self.members.pop();
            self.insert_sorted(member);
            return IslandInsert::Accepted { evicted };
        }
        self.insert_sorted(member);
        IslandInsert::Accepted { evicted: None }
    }

    fn insert_sorted(&mut self, member: Member) {
        let pos = self.members.partition_point(|m| m.ranks_above(&member));
        self.members.insert(pos, member);
    }

    /// How many members count as elite at the given selection ratio.
    /// Zero only when the island is empty; otherwise at least one.
    pub fn elite_count(&self, ratio: f64) -> usize {
        if self.members.is_empty() {
            return 0;
        }
        let count = (ratio * self.capacity as f64).ceil() as usize;
        count.clamp(1, self.members.len())
    }

    pub fn best(&self) -> Option<&Member> {
        self.members.first()
    }

    pub fn worst(&self) -> Option<&Member> {
        self.members.last()
    }

    /// Members in rank order, best first.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// The top `n` members (fewer if the island is smaller).
    pub fn top(&self, n: usize) -> &[Member] {
        &self.members[..n.min(self.members.len())]
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
