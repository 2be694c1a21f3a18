//! Checkpoint persistence.
//!
//! A checkpoint is the database snapshot plus the generation counter, the
//! RNG seed for the next stretch of the run, and the history log. It is
//! complete enough to resume without re-deriving any fitness score.
//! Writes are atomic (temp file then rename), so a crash mid-checkpoint
//! leaves the previous checkpoint intact.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use evo_database::DatabaseSnapshot;

use crate::engine::GenerationRecord;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Completed generations at the time of the checkpoint.
    pub generation: u64,
    /// Seed the engine reseeds its RNG from on resume. The running engine
    /// reseeds from the same value when it writes the checkpoint, so a
    /// resumed run and an uninterrupted one draw identical numbers.
    pub rng_seed: u64,
    pub snapshot: DatabaseSnapshot,
    pub history: Vec<GenerationRecord>,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use evo_core::Candidate;
    use evo_database::{DatabaseConfig, ProgramDatabase};

    fn sample_checkpoint() -> Checkpoint {
        let mut db = ProgramDatabase::new(DatabaseConfig {
            num_islands: 2,
            population_size: 4,
            ..DatabaseConfig::default()
        });
        db.insert(Candidate::seed("alpha beta gamma", 0).with_fitness(1.0, BTreeMap::new()));
        db.insert(Candidate::seed("delta epsilon zeta", 1).with_fitness(2.0, BTreeMap::new()));
        Checkpoint {
            generation: 10,
            rng_seed: 42,
            snapshot: db.snapshot(),
            history: Vec::new(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("evo-ckpt-{:016x}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("checkpoint.json");

        let checkpoint = sample_checkpoint();
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.generation, 10);
        assert_eq!(loaded.rng_seed, 42);

        let restored = loaded.snapshot.restore().unwrap();
        assert_eq!(restored.population(), 2);
        assert_eq!(restored.archive().len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn loading_a_missing_file_fails() {
        let path = std::env::temp_dir().join("evo-ckpt-does-not-exist.json");
        assert!(matches!(
            Checkpoint::load(&path),
            Err(CheckpointError::Io(_))
        ));
    }
}
