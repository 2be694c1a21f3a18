//! Near-duplicate detection.
//!
//! Candidates are fingerprinted with a MinHash signature over their
//! identifier tokens, then bucketed with locality-sensitive banding: the
//! signature's rows are folded into a handful of band keys, and two
//! candidates sharing any band key are treated as near-duplicates. Cheap
//! churn (reordered lines, whitespace, duplicated statements) leaves the
//! token set intact and therefore collides; a genuinely new program almost
//! never does.
//!
//! The index is rebuilt from candidate code on checkpoint restore rather
//! than serialized, so signature parameters can change between versions
//! without invalidating old checkpoints.

use std::collections::{BTreeMap, BTreeSet};

use evo_core::hash::{fnv1a_with, FNV_OFFSET};
use evo_core::CandidateId;

pub const SIGNATURE_ROWS: usize = 16;
pub const BANDS: usize = 4;
const ROWS_PER_BAND: usize = SIGNATURE_ROWS / BANDS;
const ROW_SALT: u64 = 0x9e3779b97f4a7c15;

fn tokens(code: &str) -> impl Iterator<Item = &str> {
    code.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
}

/// MinHash signature of a program's identifier tokens.
///
/// Token order and multiplicity do not affect the signature; only the set
/// of distinct tokens does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature([u64; SIGNATURE_ROWS]);

impl Signature {
    pub fn of(code: &str) -> Self {
        let mut rows = [u64::MAX; SIGNATURE_ROWS];
        for token in tokens(code) {
            for (row, slot) in rows.iter_mut().enumerate() {
                let seed = FNV_OFFSET ^ (row as u64).wrapping_mul(ROW_SALT);
                let h = fnv1a_with(seed, token.as_bytes());
                if h < *slot {
                    *slot = h;
                }
            }
        }
        Signature(rows)
    }

    /// Folds the signature into one key per band. Equal band keys mean the
    /// underlying row groups were identical.
    pub fn band_keys(&self) -> [u64; BANDS] {
        let mut keys = [0u64; BANDS];
        for (band, key) in keys.iter_mut().enumerate() {
            let mut h = FNV_OFFSET;
            for row in 0..ROWS_PER_BAND {
                h = fnv1a_with(h, &self.0[band * ROWS_PER_BAND + row].to_le_bytes());
            }
            *key = h;
        }
        keys
    }
}

/// LSH index from band keys to the candidates currently holding them.
#[derive(Debug, Default)]
pub struct SimilarityIndex {
    buckets: BTreeMap<(usize, u64), BTreeSet<CandidateId>>,
    keys: BTreeMap<CandidateId, [u64; BANDS]>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: CandidateId, signature: &Signature) {
        let keys = signature.band_keys();
        for (band, &key) in keys.iter().enumerate() {
            self.buckets.entry((band, key)).or_default().insert(id);
        }
        self.keys.insert(id, keys);
    }

    /// Removes a candidate from every band bucket. No-op for unknown ids.
    pub fn remove(&mut self, id: CandidateId) {
        let Some(keys) = self.keys.remove(&id) else {
            return;
        };
        for (band, &key) in keys.iter().enumerate() {
            if let Some(bucket) = self.buckets.get_mut(&(band, key)) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(&(band, key));
                }
            }
        }
    }

    /// All indexed candidates sharing at least one band with `signature`.
    pub fn collisions(&self, signature: &Signature) -> BTreeSet<CandidateId> {
        let mut hits = BTreeSet::new();
        for (band, &key) in signature.band_keys().iter().enumerate() {
            if let Some(bucket) = self.buckets.get(&(band, key)) {
                hits.extend(bucket.iter().copied());
            }
        }
        hits
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Exact Jaccard similarity of two programs' token sets. Used for logging
/// when a collision rejects a candidate, not for the rejection itself.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = tokens(a).collect();
    let tb: BTreeSet<&str> = tokens(b).collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - inter;
    inter as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_code_has_identical_signature() {
        let a = Signature::of("def main():\n    return 1");
        let b = Signature::of("def main():\n    return 1");
        assert_eq!(a, b);
    }

    #[test]
    fn token_order_and_repetition_do_not_matter() {
        let a = Signature::of("alpha beta gamma");
        let b = Signature::of("gamma gamma alpha beta alpha");
        assert_eq!(a, b);
        assert_eq!(a.band_keys(), b.band_keys());
    }

    #[test]
    fn disjoint_token_sets_do_not_collide() {
        let mut index = SimilarityIndex::new();
        index.insert(CandidateId(1), &Signature::of("quick brown fox jumps"));

        let other = Signature::of("lazy dogs sleep soundly");
        assert!(index.collisions(&other).is_empty());
    }

    #[test]
    fn same_token_set_collides_in_every_band() {
        let mut index = SimilarityIndex::new();
        let original = Signature::of("def fib(n):\n    return fib(n - 1) + fib(n - 2)");
        index.insert(CandidateId(7), &original);

        // Identical token set, different formatting.
        let reformatted = Signature::of("def fib(n): return fib(n-1)+fib(n-2)");
        let hits = index.collisions(&reformatted);
        assert!(hits.contains(&CandidateId(7)));
    }

    #[test]
    fn remove_clears_all_bands() {
        let mut index = SimilarityIndex::new();
        let sig = Signature::of("some program text");
        index.insert(CandidateId(1), &sig);
        assert!(index.contains(CandidateId(1)));

        index.remove(CandidateId(1));
        assert!(!index.contains(CandidateId(1)));
        assert!(index.collisions(&sig).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        assert_eq!(token_jaccard("a b c", "c b a"), 1.0);
        assert_eq!(token_jaccard("", ""), 1.0);
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        assert_eq!(token_jaccard("a b", "c d"), 0.0);
    }

    #[test]
    fn jaccard_counts_distinct_tokens() {
        // {a, b} vs {b, c}: intersection 1, union 3.
        let j = token_jaccard("a b b b", "b c");
        assert!((j - 1.0 / 3.0).abs() < 1e-9);
    }
}
