//! The evolution controller.
//!
//! Owns the whole run: seeding, the generation loop (select parent, mutate,
//! evaluate, insert), migration and checkpoint cadence, and the output
//! artifacts. Everything stateful lives in one [`Engine`] value with an
//! explicit checkpoint/restore contract; there is no ambient module state.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | [`RunConfig`]: the full configuration surface, file loading, validation |
//! | [`engine`] | [`Engine`]: the controller loop and bounded evaluation pool |
//! | [`checkpoint`] | Snapshot persistence sufficient to resume a run |

pub mod checkpoint;
pub mod config;
pub mod engine;

pub use checkpoint::{Checkpoint, CheckpointError};
pub use config::{ConfigError, RunConfig};
pub use engine::{Engine, EngineError, GenerationRecord, RunSummary};
