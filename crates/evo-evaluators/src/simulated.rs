//! Deterministic evaluators for tests.
//!
//! Exported publicly so downstream crates (and the engine's own tests) can
//! drive full evolution runs without touching an external build pipeline.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::pipeline::StageEvaluator;
use crate::report::{EvalFailure, EvalStage, StageScore};

/// Shared view of the stages an evaluator was asked to run, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<EvalStage>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<EvalStage> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, stage: EvalStage) {
        self.0.lock().unwrap().push(stage);
    }
}

/// Evaluator returning scripted per-stage scores.
pub struct SimulatedEvaluator {
    stage1: StageScore,
    stage2: StageScore,
    log: CallLog,
}

impl SimulatedEvaluator {
    pub fn new() -> Self {
        Self {
            stage1: StageScore::new(1.0),
            stage2: StageScore::new(1.0),
            log: CallLog::default(),
        }
    }

    pub fn with_stage1_score(mut self, score: f64) -> Self {
        self.stage1.score = score;
        self
    }

    pub fn with_stage2_score(mut self, score: f64) -> Self {
        self.stage2.score = score;
        self
    }

    pub fn with_stage1_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.stage1.metrics.insert(key.into(), value);
        self
    }

    pub fn with_stage2_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.stage2.metrics.insert(key.into(), value);
        self
    }

    /// A handle onto the call log that stays valid after the evaluator
    /// moves into an `Arc<dyn StageEvaluator>`.
    pub fn handle(&self) -> CallLog {
        self.log.clone()
    }
}

impl Default for SimulatedEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageEvaluator for SimulatedEvaluator {
    async fn evaluate(&self, _source: &str, stage: EvalStage) -> Result<StageScore, EvalFailure> {
        self.log.record(stage);
        Ok(match stage {
            EvalStage::Stage1 => self.stage1.clone(),
            EvalStage::Stage2 => self.stage2.clone(),
        })
    }
}

/// Evaluator that fails, either at every stage or at one chosen stage.
pub struct FailingEvaluator {
    fail_at: Option<EvalStage>,
}

impl FailingEvaluator {
    /// Fails at any stage.
    pub fn new() -> Self {
        Self { fail_at: None }
    }

    /// Passes earlier stages with a neutral score, fails at `stage`.
    pub fn at(stage: EvalStage) -> Self {
        Self {
            fail_at: Some(stage),
        }
    }
}

impl Default for FailingEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageEvaluator for FailingEvaluator {
    async fn evaluate(&self, _source: &str, stage: EvalStage) -> Result<StageScore, EvalFailure> {
        match self.fail_at {
            Some(fail_at) if stage != fail_at => Ok(StageScore::new(1.0)),
            _ => Err(EvalFailure::Spawn {
                stage,
                message: "simulated evaluation failure".to_string(),
            }),
        }
    }
}
