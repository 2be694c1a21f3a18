//! Cascade evaluation for candidate programs.
//!
//! Scoring a candidate is the expensive step of the evolution loop: an
//! external build-and-benchmark run taking minutes to hours. The cascade
//! bounds that cost with a cheap first stage that can terminate evaluation
//! before the full benchmark runs.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`report`] | [`StageScore`], [`FitnessReport`], [`EvalFailure`] |
//! | [`pipeline`] | [`StageEvaluator`] capability, [`CascadePipeline`] state machine |
//! | [`command`] | External-program evaluator with timeout and workspace policy |
//! | [`simulated`] | Deterministic fakes for tests, here and downstream |

pub mod command;
pub mod pipeline;
pub mod report;
pub mod simulated;

pub use command::{CommandEvaluator, CommandEvaluatorConfig, WorkspacePolicy};
pub use pipeline::{CascadePipeline, CascadeSettings, StageEvaluator};
pub use report::{EvalFailure, EvalPhase, EvalStage, FitnessReport, StageScore};
pub use simulated::{CallLog, FailingEvaluator, SimulatedEvaluator};
