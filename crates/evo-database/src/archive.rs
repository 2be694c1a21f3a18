//! Global elite archive.
//!
//! A bounded, fitness-sorted set of the best candidates seen anywhere in the
//! search. Admission is monotone: once the archive is full, a candidate gets
//! in only by strictly outranking the current minimum, so the archive's
//! minimum fitness never decreases for the remainder of the run.

use evo_core::CandidateId;
use serde::{Deserialize, Serialize};

use crate::island::Member;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    capacity: usize,
    members: Vec<Member>,
}

impl Archive {
    pub fn new(capacity: usize) -> Self {
        Archive {
            capacity,
            members: Vec::with_capacity(capacity),
        }
    }

    /// Offers a candidate a place in the archive. Returns whether it was
    /// admitted; when admission evicts the previous minimum, that member is
    /// dropped silently (it usually still lives on its island).
    pub fn offer(&mut self, member: Member) -> bool {
        if self.members.len() >= self.capacity {
            let outranks_worst = match self.members.last() {
                Some(worst) => member.ranks_above(worst),
                None => false,
            };
            if !outranks_worst {
                return false;
            }
            self.members.pop();
        }
        let pos = self.members.partition_point(|m| m.ranks_above(&member));
        self.members.insert(pos, member);
        true
    }

    /// Fitness of the weakest archived candidate.
    pub fn min_fitness(&self) -> Option<f64> {
        self.members.last().map(|m| m.fitness)
    }

    pub fn best(&self) -> Option<&Member> {
        self.members.first()
    }

    /// The top `n` archived candidates, skipping `exclude`. Used to gather
    /// inspiration programs without echoing the parent back at the model.
    pub fn top_excluding(&self, n: usize, exclude: CandidateId) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.id != exclude)
            .take(n)
            .copied()
            .collect()
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn members(&self) -> &[Member] {
        &self.members
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
