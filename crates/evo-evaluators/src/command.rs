//! External-program stage evaluator.
//!
//! Runs a configured command per stage against a candidate written to a
//! fresh temp workspace, with a hard timeout and kill-on-drop, and parses
//! a JSON result object from the command's stdout:
//!
//! ```text
//! {"score": 1.37, "metrics": {"build_time": 12.4, "measured_time": 0.81}}
//! ```
//!
//! The command receives the stage name and candidate path as trailing
//! arguments, plus `EVO_STAGE` and `EVO_BUILD_DIR` in its environment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use evo_core::{file_extension, strip_evolve_markers};

use crate::pipeline::StageEvaluator;
use crate::report::{EvalFailure, EvalStage, StageScore};

/// How concurrent evaluation slots treat the external build directory.
///
/// Concurrent builds in one shared directory corrupt each other, so the
/// choice between the two policies is explicit and enforced here rather
/// than left to the evaluation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkspacePolicy {
    /// Every run builds inside its own temp workspace. Safe at any
    /// concurrency level.
    Isolated,
    /// All runs share `build_dir`; runs are serialized through an async
    /// lock, so `parallel_evaluations > 1` still only builds one candidate
    /// at a time.
    Shared { build_dir: PathBuf },
}

impl Default for WorkspacePolicy {
    fn default() -> Self {
        WorkspacePolicy::Isolated
    }
}

/// Configuration for [`CommandEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvaluatorConfig {
    /// Program to run for both stages.
    pub program: String,
    /// Arguments placed before the stage name and candidate path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Hard timeout per stage run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Language tag controlling the candidate file extension.
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub workspace: WorkspacePolicy,
}

fn default_timeout_secs() -> u64 {
    300
}

/// Stage evaluator backed by an external command.
pub struct CommandEvaluator {
    config: CommandEvaluatorConfig,
    build_lock: Mutex<()>,
}

impl CommandEvaluator {
    pub fn new(config: CommandEvaluatorConfig) -> Self {
        Self {
            config,
            build_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl StageEvaluator for CommandEvaluator {
    async fn evaluate(&self, source: &str, stage: EvalStage) -> Result<StageScore, EvalFailure> {
        // Marker lines are prompt furniture, not program text.
        let source = strip_evolve_markers(source);

        let workspace = std::env::temp_dir().join(format!("evo-eval-{:016x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| EvalFailure::Spawn {
                stage,
                message: format!("failed to create workspace: {e}"),
            })?;

        let extension = file_extension(&self.config.language);
        let candidate_path = workspace.join(format!("candidate.{extension}"));
        if let Err(e) = tokio::fs::write(&candidate_path, &source).await {
            let _ = tokio::fs::remove_dir_all(&workspace).await;
            return Err(EvalFailure::Spawn {
                stage,
                message: format!("failed to write candidate: {e}"),
            });
        }

        let build_dir = match &self.config.workspace {
            WorkspacePolicy::Isolated => workspace.clone(),
            WorkspacePolicy::Shared { build_dir } => build_dir.clone(),
        };

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(stage.name())
            .arg(&candidate_path)
            .env("EVO_STAGE", stage.name())
            .env("EVO_BUILD_DIR", &build_dir)
            .kill_on_drop(true);

        // Held across the whole run under the shared policy, so concurrent
        // slots never build in the same directory at once.
        let _guard = match self.config.workspace {
            WorkspacePolicy::Shared { .. } => Some(self.build_lock.lock().await),
            WorkspacePolicy::Isolated => None,
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let result = tokio::time::timeout(timeout, cmd.output()).await;
        let _ = tokio::fs::remove_dir_all(&workspace).await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if output.status.success() {
                    let score = parse_stage_output(&stdout).ok_or_else(|| {
                        EvalFailure::BadOutput {
                            stage,
                            message: format!(
                                "no result object in stdout (starts {:?})",
                                excerpt(&stdout, 120)
                            ),
                        }
                    })?;
                    debug!(%stage, score = score.score, "stage evaluation complete");
                    Ok(score)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(EvalFailure::NonZeroExit {
                        stage,
                        code: output.status.code(),
                        stderr: excerpt(&stderr, 500),
                    })
                }
            }
            Ok(Err(e)) => Err(EvalFailure::Spawn {
                stage,
                message: e.to_string(),
            }),
            Err(_) => Err(EvalFailure::Timeout {
                stage,
                secs: self.config.timeout_secs,
            }),
        }
    }
}

/// Last line of stdout that parses as a result object wins, so evaluation
/// scripts can print progress noise before the final JSON.
fn parse_stage_output(stdout: &str) -> Option<StageScore> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<RawStageOutput>(line).ok())
        .map(|raw| StageScore {
            score: raw.score,
            metrics: raw.metrics,
        })
}

#[derive(Deserialize)]
struct RawStageOutput {
    score: f64,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
}

fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_evaluator(script: &str, timeout_secs: u64) -> CommandEvaluator {
        CommandEvaluator::new(CommandEvaluatorConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            timeout_secs,
            language: "python".to_string(),
            workspace: WorkspacePolicy::Isolated,
        })
    }

    #[test]
    fn parses_last_json_line() {
        let stdout = "building...\nwarming up\n{\"score\": 0.2}\n{\"score\": 1.5, \"metrics\": {\"build_time\": 3.0}}\n";
        let score = parse_stage_output(stdout).unwrap();
        assert_eq!(score.score, 1.5);
        assert_eq!(score.metrics.get("build_time"), Some(&3.0));
    }

    #[test]
    fn noise_only_stdout_parses_to_nothing() {
        assert!(parse_stage_output("no json here\n42\n").is_none());
        assert!(parse_stage_output("{not json}\n").is_none());
    }

    #[tokio::test]
    async fn shell_command_round_trip() {
        let eval = shell_evaluator(r#"echo "{\"score\": 2.5, \"metrics\": {\"build_time\": 1.0}}""#, 10);
        let score = eval.evaluate("print('hi')", EvalStage::Stage1).await.unwrap();
        assert_eq!(score.score, 2.5);
        assert_eq!(score.metrics.get("build_time"), Some(&1.0));
    }

    #[tokio::test]
    async fn stage_and_candidate_path_reach_the_command() {
        // $1 is the stage name, $2 the candidate path; echo the stage back
        // as the score's metric count surrogate.
        let eval = shell_evaluator(
            r#"test "$1" = "stage2" && test -f "$2" && echo "{\"score\": 1.0}""#,
            10,
        );
        assert!(eval.evaluate("x = 1", EvalStage::Stage2).await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_infrastructure_failure() {
        let eval = shell_evaluator("echo boom >&2; exit 3", 10);
        match eval.evaluate("x", EvalStage::Stage1).await.unwrap_err() {
            EvalFailure::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_stdout_is_bad_output() {
        let eval = shell_evaluator("echo not-a-result", 10);
        assert!(matches!(
            eval.evaluate("x", EvalStage::Stage1).await,
            Err(EvalFailure::BadOutput { .. })
        ));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let eval = shell_evaluator("sleep 30", 1);
        match eval.evaluate("x", EvalStage::Stage2).await.unwrap_err() {
            EvalFailure::Timeout { stage, secs } => {
                assert_eq!(stage, EvalStage::Stage2);
                assert_eq!(secs, 1);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let eval = CommandEvaluator::new(CommandEvaluatorConfig {
            program: "/nonexistent/evaluator".to_string(),
            args: Vec::new(),
            timeout_secs: 5,
            language: String::new(),
            workspace: WorkspacePolicy::Isolated,
        });
        assert!(matches!(
            eval.evaluate("x", EvalStage::Stage1).await,
            Err(EvalFailure::Spawn { .. })
        ));
    }
}
