//! Evaluation results and failures.
//!
//! A stage run either produces a [`StageScore`] or an [`EvalFailure`].
//! Failures are infrastructural (spawn error, crash, timeout, unparsable
//! output) and are kept strictly apart from low-but-valid scores: the
//! database records a failed candidate for lineage only and never inserts
//! it into an island.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two cost tiers of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStage {
    /// Cheap, reduced-scope run producing a provisional score.
    Stage1,
    /// Full evaluation producing the final score.
    Stage2,
}

impl EvalStage {
    pub fn name(&self) -> &'static str {
        match self {
            EvalStage::Stage1 => "stage1",
            EvalStage::Stage2 => "stage2",
        }
    }
}

impl fmt::Display for EvalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw result of one stage run: a baseline-relative score plus whatever
/// auxiliary metrics the evaluator reported (build time, output size, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageScore {
    pub score: f64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl StageScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// Infrastructural evaluation failure. Distinct from a low score.
#[derive(Debug, Error)]
pub enum EvalFailure {
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: EvalStage, secs: u64 },

    #[error("{stage} could not be started: {message}")]
    Spawn { stage: EvalStage, message: String },

    #[error("{stage} exited with {code:?}: {stderr}")]
    NonZeroExit {
        stage: EvalStage,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{stage} produced unparsable output: {message}")]
    BadOutput { stage: EvalStage, message: String },
}

impl EvalFailure {
    /// Which stage the failure occurred in.
    pub fn stage(&self) -> EvalStage {
        match self {
            EvalFailure::Timeout { stage, .. }
            | EvalFailure::Spawn { stage, .. }
            | EvalFailure::NonZeroExit { stage, .. }
            | EvalFailure::BadOutput { stage, .. } => *stage,
        }
    }
}

/// How the cascade concluded for a candidate that did produce a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalPhase {
    /// Full evaluation ran (or cascade was disabled).
    Scored,
    /// Stage 1 fell below the cascade threshold; fitness derives from the
    /// stage-1 result alone.
    Stage1Failed,
}

/// Final fitness for a candidate, with the per-stage trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitnessReport {
    pub fitness: f64,
    /// Merged metrics across the stages that ran, plus the per-stage scores
    /// under `stage1_score` / `stage2_score`.
    pub metrics: BTreeMap<String, f64>,
    pub stage1: Option<StageScore>,
    pub stage2: Option<StageScore>,
    pub stage2_ran: bool,
    pub phase: EvalPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(EvalStage::Stage1.name(), "stage1");
        assert_eq!(EvalStage::Stage2.to_string(), "stage2");
    }

    #[test]
    fn failure_reports_its_stage() {
        let failure = EvalFailure::Timeout {
            stage: EvalStage::Stage2,
            secs: 300,
        };
        assert_eq!(failure.stage(), EvalStage::Stage2);
        assert!(failure.to_string().contains("stage2"));
        assert!(failure.to_string().contains("300"));
    }

    #[test]
    fn stage_score_builder_collects_metrics() {
        let score = StageScore::new(1.5)
            .with_metric("build_time", 12.0)
            .with_metric("output_size", 4096.0);
        assert_eq!(score.score, 1.5);
        assert_eq!(score.metrics.get("build_time"), Some(&12.0));
    }

    #[test]
    fn stage_score_parses_without_metrics() {
        let score: StageScore = serde_json::from_str(r#"{"score": 0.9}"#).unwrap();
        assert_eq!(score.score, 0.9);
        assert!(score.metrics.is_empty());
    }
}
