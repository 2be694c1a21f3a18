//! Candidates and their lineage.
//!
//! A [`Candidate`] is one program variant: its source code, where it came
//! from, and what the evaluator thought of it. Candidates are immutable once
//! scored; evolution only ever adds new ones.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hash;

/// Stable identity of a candidate, derived from its code and provenance.
///
/// Two candidates with the same code but different parents, generations, or
/// islands get distinct ids, so seeding the same program onto every island
/// produces one entry per island.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateId(pub u64);

impl CandidateId {
    pub fn derive(code: &str, parents: &[CandidateId], generation: u64, island: usize) -> Self {
        let mut h = hash::fnv1a(code.as_bytes());
        for parent in parents {
            h = hash::fnv1a_with(h, &parent.0.to_le_bytes());
        }
        h = hash::fnv1a_with(h, &generation.to_le_bytes());
        h = hash::fnv1a_with(h, &(island as u64).to_le_bytes());
        CandidateId(h)
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// Serialized as a 16-digit hex string so ids can be used as JSON map keys
// and stay greppable in checkpoints and logs.
impl Serialize for CandidateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CandidateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = CandidateId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex-encoded candidate id")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CandidateId, E> {
                u64::from_str_radix(value, 16)
                    .map(CandidateId)
                    .map_err(|_| E::custom(format!("invalid candidate id {value:?}")))
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

/// What happened to a candidate after it entered the lineage.
///
/// Every candidate the engine ever produced keeps a lineage entry, including
/// the ones the population rejected. Only `Active` candidates occupy island
/// slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    /// Holds a slot in its island's population.
    Active,
    /// Was accepted, then pushed out by a better arrival.
    Evicted,
    /// Rejected at insertion: near-duplicate of an equal-or-better candidate.
    RejectedDuplicate,
    /// Rejected at insertion: island was full and the candidate did not beat
    /// the current worst member.
    RejectedInferior,
    /// Evaluation failed; kept for ancestry only, never eligible as a parent.
    Errored,
}

/// One program variant in the evolutionary search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub code: String,
    /// Direct ancestors. Empty for seeds, one entry for mutations and
    /// migrated copies.
    pub parents: Vec<CandidateId>,
    pub generation: u64,
    pub island: usize,
    /// Admission order assigned by the database. Lower means older; ties in
    /// fitness resolve in favor of the lower sequence number.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub fitness: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
    /// Display name of the model that produced this candidate, or "seed".
    pub model: String,
}

impl Candidate {
    /// An initial candidate with no ancestry, placed on `island`.
    pub fn seed(code: impl Into<String>, island: usize) -> Self {
        let code = code.into();
        let id = CandidateId::derive(&code, &[], 0, island);
        Candidate {
            id,
            code,
            parents: Vec::new(),
            generation: 0,
            island,
            seq: 0,
            created_at: Utc::now(),
            fitness: None,
            metrics: BTreeMap::new(),
            model: "seed".to_string(),
        }
    }

    /// A mutated child of `parent`, produced by `model`.
    pub fn child(
        code: impl Into<String>,
        parent: &Candidate,
        generation: u64,
        model: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let parents = vec![parent.id];
        let id = CandidateId::derive(&code, &parents, generation, parent.island);
        Candidate {
            id,
            code,
            parents,
            generation,
            island: parent.island,
            seq: 0,
            created_at: Utc::now(),
            fitness: None,
            metrics: BTreeMap::new(),
            model: model.into(),
        }
    }

    /// A migrated copy of `source` arriving on `target_island`.
    ///
    /// Migration copies rather than moves: the copy is a new candidate with
    /// fresh identity, recorded as a child of the original, carrying the
    /// original's score so it competes immediately.
    pub fn migrant(source: &Candidate, target_island: usize, generation: u64) -> Self {
        let parents = vec![source.id];
        let id = CandidateId::derive(&source.code, &parents, generation, target_island);
        Candidate {
            id,
            code: source.code.clone(),
            parents,
            generation,
            island: target_island,
            seq: 0,
            created_at: Utc::now(),
            fitness: source.fitness,
            metrics: source.metrics.clone(),
            model: source.model.clone(),
        }
    }

    pub fn with_fitness(mut self, fitness: f64, metrics: BTreeMap<String, f64>) -> Self {
        self.fitness = Some(fitness);
        self.metrics = metrics;
        self
    }

    /// Fitness, or 0.0 when the candidate was never scored.
    pub fn fitness_or_zero(&self) -> f64 {
        self.fitness.unwrap_or(0.0)
    }
}
