//! FNV-1a hashing.
//!
//! Candidate identity and similarity signatures both need a stable,
//! dependency-free hash that produces identical values across runs and
//! platforms. FNV-1a over the raw bytes fits: it is deterministic, cheap,
//! and good enough for bucketing non-adversarial inputs.

pub const FNV_OFFSET: u64 = 0xcbf29ce484222325;
pub const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a over `bytes` starting from the standard offset basis.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_with(FNV_OFFSET, bytes)
}

/// FNV-1a over `bytes` starting from `seed`.
///
/// Seeding with distinct values yields independent hash families, which the
/// similarity index uses to derive its MinHash rows from a single function.
pub fn fnv1a_with(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = fnv1a(b"fn main() {}");
        let b = fnv1a(b"fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn sensitive_to_single_byte() {
        assert_ne!(fnv1a(b"abc"), fnv1a(b"abd"));
    }

    #[test]
    fn empty_input_returns_seed() {
        assert_eq!(fnv1a_with(12345, b""), 12345);
        assert_eq!(fnv1a(b""), FNV_OFFSET);
    }

    #[test]
    fn distinct_seeds_give_independent_values() {
        let x = fnv1a_with(FNV_OFFSET ^ 1, b"token");
        let y = fnv1a_with(FNV_OFFSET ^ 2, b"token");
        assert_ne!(x, y);
    }
}
