//! The cascade state machine.
//!
//! Per candidate: `Pending -> Stage1Running -> {Stage1Passed ->
//! Stage2Running -> Scored, Stage1Failed}`, with any stage able to end in
//! an infrastructural failure instead. With cascade evaluation disabled the
//! pipeline runs stage 2 directly, mirroring an evaluator whose `evaluate`
//! is its full evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::report::{EvalFailure, EvalPhase, EvalStage, FitnessReport, StageScore};

/// Capability to score one candidate at one cost tier.
///
/// Implementations must be re-entrant: evaluating the same source twice
/// (e.g. replaying work after a crash-recovery restart) must be safe and
/// must not corrupt any shared build state.
#[async_trait]
pub trait StageEvaluator: Send + Sync {
    async fn evaluate(&self, source: &str, stage: EvalStage) -> Result<StageScore, EvalFailure>;
}

/// Cascade policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSettings {
    /// When false, stage 1 is skipped entirely and stage 2 runs directly.
    pub cascade_evaluation: bool,
    /// Minimum acceptable stage-1 score. Only the first entry gates the
    /// two-stage cascade; an empty list disables the gate.
    pub cascade_thresholds: Vec<f64>,
    /// Normalizer for the build-overhead fitness penalty. Larger values
    /// soften the penalty.
    pub build_time_normalizer: f64,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            cascade_evaluation: true,
            cascade_thresholds: vec![0.5],
            build_time_normalizer: 60.0,
        }
    }
}

/// Runs candidates through the cascade and shapes the final fitness.
pub struct CascadePipeline {
    evaluator: Arc<dyn StageEvaluator>,
    settings: CascadeSettings,
}

impl CascadePipeline {
    pub fn new(evaluator: Arc<dyn StageEvaluator>, settings: CascadeSettings) -> Self {
        Self {
            evaluator,
            settings,
        }
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    /// Scores `source`. Errors are infrastructural failures only; a
    /// candidate that merely performs badly still gets an `Ok` report.
    pub async fn run(&self, source: &str) -> Result<FitnessReport, EvalFailure> {
        if !self.settings.cascade_evaluation {
            let stage2 = self.evaluator.evaluate(source, EvalStage::Stage2).await?;
            return Ok(self.scored_report(None, stage2));
        }

        let stage1 = self.evaluator.evaluate(source, EvalStage::Stage1).await?;
        if let Some(&threshold) = self.settings.cascade_thresholds.first() {
            if stage1.score < threshold {
                debug!(
                    score = stage1.score,
                    threshold, "stage 1 below cascade threshold, skipping stage 2"
                );
                let fitness = self.penalized(stage1.score, &stage1.metrics);
                let mut metrics = stage1.metrics.clone();
                metrics.insert("stage1_score".to_string(), stage1.score);
                return Ok(FitnessReport {
                    fitness,
                    metrics,
                    stage1: Some(stage1),
                    stage2: None,
                    stage2_ran: false,
                    phase: EvalPhase::Stage1Failed,
                });
            }
        }

        let stage2 = self.evaluator.evaluate(source, EvalStage::Stage2).await?;
        Ok(self.scored_report(Some(stage1), stage2))
    }

    fn scored_report(&self, stage1: Option<StageScore>, stage2: StageScore) -> FitnessReport {
        let fitness = self.penalized(stage2.score, &stage2.metrics);
        let mut metrics = BTreeMap::new();
        if let Some(ref s1) = stage1 {
            metrics.extend(s1.metrics.clone());
            metrics.insert("stage1_score".to_string(), s1.score);
        }
        metrics.extend(stage2.metrics.clone());
        metrics.insert("stage2_score".to_string(), stage2.score);
        FitnessReport {
            fitness,
            metrics,
            stage1,
            stage2: Some(stage2),
            stage2_ran: true,
            phase: EvalPhase::Scored,
        }
    }

    /// Applies the build-overhead penalty: `score / (1 + build_time / n)`.
    /// A missing `build_time` metric means no penalty.
    fn penalized(&self, score: f64, metrics: &BTreeMap<String, f64>) -> f64 {
        match metrics.get("build_time") {
            Some(&build_time) if build_time > 0.0 => {
                score / (1.0 + build_time / self.settings.build_time_normalizer)
            }
            _ => score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{FailingEvaluator, SimulatedEvaluator};

    fn pipeline(evaluator: SimulatedEvaluator, settings: CascadeSettings) -> CascadePipeline {
        CascadePipeline::new(Arc::new(evaluator), settings)
    }

    #[tokio::test]
    async fn passing_stage_one_runs_stage_two() {
        let eval = SimulatedEvaluator::new().with_stage1_score(0.8).with_stage2_score(1.4);
        let eval_handle = eval.handle();
        let pipe = pipeline(eval, CascadeSettings::default());

        let report = pipe.run("code").await.unwrap();
        assert_eq!(report.phase, EvalPhase::Scored);
        assert!(report.stage2_ran);
        assert_eq!(report.fitness, 1.4);
        assert_eq!(
            eval_handle.calls(),
            vec![EvalStage::Stage1, EvalStage::Stage2]
        );
        assert_eq!(report.metrics.get("stage1_score"), Some(&0.8));
        assert_eq!(report.metrics.get("stage2_score"), Some(&1.4));
    }

    #[tokio::test]
    async fn stage_one_below_threshold_never_runs_stage_two() {
        let settings = CascadeSettings {
            cascade_thresholds: vec![0.95],
            ..CascadeSettings::default()
        };
        let eval = SimulatedEvaluator::new().with_stage1_score(0.5);
        let eval_handle = eval.handle();
        let pipe = pipeline(eval, settings);

        let report = pipe.run("code").await.unwrap();
        assert_eq!(report.phase, EvalPhase::Stage1Failed);
        assert!(!report.stage2_ran);
        assert!(report.stage2.is_none());
        assert_eq!(report.fitness, 0.5);
        assert_eq!(eval_handle.calls(), vec![EvalStage::Stage1]);
    }

    #[tokio::test]
    async fn disabled_cascade_goes_straight_to_stage_two() {
        let settings = CascadeSettings {
            cascade_evaluation: false,
            ..CascadeSettings::default()
        };
        let eval = SimulatedEvaluator::new().with_stage2_score(2.0);
        let eval_handle = eval.handle();
        let pipe = pipeline(eval, settings);

        let report = pipe.run("code").await.unwrap();
        assert_eq!(report.phase, EvalPhase::Scored);
        assert!(report.stage1.is_none());
        assert_eq!(report.fitness, 2.0);
        assert_eq!(eval_handle.calls(), vec![EvalStage::Stage2]);
    }

    #[tokio::test]
    async fn empty_thresholds_disable_the_gate() {
        let settings = CascadeSettings {
            cascade_thresholds: Vec::new(),
            ..CascadeSettings::default()
        };
        let eval = SimulatedEvaluator::new().with_stage1_score(0.0).with_stage2_score(1.0);
        let pipe = pipeline(eval, settings);

        let report = pipe.run("code").await.unwrap();
        assert!(report.stage2_ran);
    }

    #[tokio::test]
    async fn build_time_reduces_fitness() {
        let settings = CascadeSettings {
            cascade_evaluation: false,
            build_time_normalizer: 60.0,
            ..CascadeSettings::default()
        };
        let eval = SimulatedEvaluator::new()
            .with_stage2_score(2.0)
            .with_stage2_metric("build_time", 60.0);
        let pipe = pipeline(eval, settings);

        let report = pipe.run("code").await.unwrap();
        // 2.0 / (1 + 60/60) = 1.0
        assert!((report.fitness - 1.0).abs() < 1e-12);
        // The raw stage score is preserved alongside the shaped fitness.
        assert_eq!(report.metrics.get("stage2_score"), Some(&2.0));
    }

    #[tokio::test]
    async fn stage_failure_propagates_with_its_stage() {
        let pipe = CascadePipeline::new(
            Arc::new(FailingEvaluator::at(EvalStage::Stage2)),
            CascadeSettings::default(),
        );
        let failure = pipe.run("code").await.unwrap_err();
        assert_eq!(failure.stage(), EvalStage::Stage2);
    }

    #[tokio::test]
    async fn rerunning_the_same_source_is_idempotent() {
        let eval = SimulatedEvaluator::new().with_stage1_score(0.9).with_stage2_score(1.1);
        let pipe = pipeline(eval, CascadeSettings::default());

        let first = pipe.run("code").await.unwrap();
        let second = pipe.run("code").await.unwrap();
        assert_eq!(first.fitness, second.fitness);
        assert_eq!(first.metrics, second.metrics);
    }
}
