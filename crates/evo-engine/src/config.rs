//! Run configuration.
//!
//! One JSON file describes an entire run: generation budget, database
//! shape, cascade policy, evaluator command, and the model ensemble. The
//! CLI may override a few top-level knobs. Validation happens once at
//! startup; a run never starts with an inconsistent configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use evo_database::DatabaseConfig;
use evo_ensemble::EnsembleEntry;
use evo_evaluators::{CascadeSettings, CommandEvaluatorConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a run needs, beyond the seed program itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Total generation budget, counting generations completed before a
    /// resume.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// Checkpoint every this many completed generations. 0 checkpoints
    /// only at the end of the run.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Migrate between islands every this many completed generations.
    /// 0 disables migration.
    #[serde(default = "default_migration_interval")]
    pub migration_interval: u64,
    /// Concurrent evaluation slots.
    #[serde(default = "default_parallel_evaluations")]
    pub parallel_evaluations: usize,
    /// Apply model output as SEARCH/REPLACE diffs against the parent.
    #[serde(default = "default_true")]
    pub diff_based_evolution: bool,
    /// Apply model output as a complete replacement program. Used when
    /// `diff_based_evolution` is off.
    #[serde(default)]
    pub allow_full_rewrites: bool,
    /// Mutations producing programs longer than this are rejected.
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
    /// Code-fence language tag. Empty means detect from the seed program.
    #[serde(default)]
    pub language: String,
    /// RNG seed for a reproducible run. Absent means draw one at startup.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cascade: CascadeSettings,
    pub evaluator: CommandEvaluatorConfig,
    pub ensemble: Vec<EnsembleEntry>,
}

fn default_max_iterations() -> u64 {
    100
}

fn default_checkpoint_interval() -> u64 {
    10
}

fn default_migration_interval() -> u64 {
    10
}

fn default_parallel_evaluations() -> usize {
    1
}

fn default_max_code_length() -> usize {
    100_000
}

fn default_true() -> bool {
    true
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".into());
        }
        if self.parallel_evaluations == 0 {
            return invalid("parallel_evaluations must be at least 1".into());
        }
        if self.database.num_islands == 0 {
            return invalid("num_islands must be at least 1".into());
        }
        if self.database.population_size == 0 {
            return invalid("population_size must be at least 1".into());
        }
        for (name, ratio) in [
            ("elite_selection_ratio", self.database.elite_selection_ratio),
            ("exploitation_ratio", self.database.exploitation_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return invalid(format!("{name} must be within [0, 1], got {ratio}"));
            }
        }
        if !self.diff_based_evolution && !self.allow_full_rewrites {
            return invalid(
                "no mutation mode enabled: set diff_based_evolution or allow_full_rewrites".into(),
            );
        }
        if self.max_code_length == 0 {
            return invalid("max_code_length must be at least 1".into());
        }
        if self.cascade.cascade_evaluation && self.cascade.cascade_thresholds.is_empty() {
            return invalid("cascade_evaluation requires at least one cascade threshold".into());
        }
        if self.cascade.build_time_normalizer <= 0.0 {
            return invalid("build_time_normalizer must be positive".into());
        }
        if self.ensemble.is_empty() {
            return invalid("ensemble must list at least one model".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_evaluators::WorkspacePolicy;

    pub(crate) fn minimal() -> RunConfig {
        RunConfig {
            max_iterations: 10,
            checkpoint_interval: 0,
            migration_interval: 0,
            parallel_evaluations: 1,
            diff_based_evolution: true,
            allow_full_rewrites: false,
            max_code_length: 10_000,
            language: String::new(),
            seed: Some(7),
            database: DatabaseConfig::default(),
            cascade: CascadeSettings::default(),
            evaluator: CommandEvaluatorConfig {
                program: "./evaluate.sh".to_string(),
                args: Vec::new(),
                timeout_secs: 60,
                language: String::new(),
                workspace: WorkspacePolicy::Isolated,
            },
            ensemble: vec![EnsembleEntry::new("m", 1.0)],
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn out_of_range_ratio_is_rejected() {
        let mut config = minimal();
        config.database.exploitation_ratio = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn some_mutation_mode_must_be_enabled() {
        let mut config = minimal();
        config.diff_based_evolution = false;
        config.allow_full_rewrites = false;
        assert!(config.validate().is_err());

        config.allow_full_rewrites = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cascade_needs_a_threshold() {
        let mut config = minimal();
        config.cascade.cascade_thresholds.clear();
        assert!(config.validate().is_err());

        config.cascade.cascade_evaluation = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        let mut config = minimal();
        config.ensemble.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_with_defaults_filled_in() {
        let json = r#"{
            "evaluator": {"program": "python3", "args": ["bench.py"]},
            "ensemble": [{"name": "primary", "weight": 2.0}]
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.parallel_evaluations, 1);
        assert!(config.diff_based_evolution);
        assert_eq!(config.evaluator.program, "python3");
        assert!(config.validate().is_ok());
    }
}
