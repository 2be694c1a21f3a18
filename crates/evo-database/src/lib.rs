//! Population storage for evolutionary code search.
//!
//! The database is the single writer for all evolutionary state. It keeps:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`island`] | Fixed-capacity, fitness-sorted subpopulations |
//! | [`archive`] | Global elite archive with monotone admission |
//! | [`similarity`] | MinHash/LSH index for near-duplicate rejection |
//! | [`database`] | [`ProgramDatabase`]: insertion, sampling, migration, snapshots |
//!
//! All containers are deterministic: identical insertion sequences produce
//! identical populations, archives, and eviction decisions.

pub mod archive;
pub mod database;
pub mod island;
pub mod similarity;

pub use archive::Archive;
pub use database::{
    DatabaseConfig, DatabaseError, DatabaseSnapshot, InsertOutcome, LineageRecord,
    MigrationMove, MigrationReport, ParentSelection, ProgramDatabase,
};
pub use island::{Island, IslandInsert, Member};
pub use similarity::{token_jaccard, Signature, SimilarityIndex};
