//! Core types for evolutionary code search.
//!
//! This crate defines the vocabulary shared by the database, ensemble, and
//! engine layers:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`candidate`] | [`Candidate`], [`CandidateId`], lineage status |
//! | [`patch`] | SEARCH/REPLACE diff parsing and application, full-rewrite extraction, evolve-block handling |
//! | [`hash`] | FNV-1a hashing used for candidate identity and similarity signatures |
//!
//! Everything here is pure data and pure functions. No I/O, no async.

pub mod candidate;
pub mod hash;
pub mod patch;

pub use candidate::{Candidate, CandidateId, LineageStatus};
pub use patch::{
    apply_diff, apply_diff_blocks, detect_language, extract_diffs, file_extension,
    format_diff_summary, parse_evolve_blocks, parse_full_rewrite, strip_evolve_markers,
    DiffBlock, EvolveBlock, MutationError, EVOLVE_END, EVOLVE_START,
};
