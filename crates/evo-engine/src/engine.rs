//! The controller loop.
//!
//! One coordinating task owns the database and the RNG. Each generation is
//! dispatched as an async task (model call plus evaluation) into a pool
//! bounded by `parallel_evaluations`; completions are inserted in arrival
//! order on the coordinator, which keeps database writes single-writer and
//! tie-break determinism intact even though evaluations finish out of
//! order. Migration and checkpoints also run on the coordinator, so they
//! never race an insertion.
//!
//! Per-generation failures (model transport, unapplicable diff, oversized
//! mutation, evaluation infrastructure) are logged and skipped; only
//! startup invariant violations abort the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use evo_core::{
    apply_diff_blocks, detect_language, extract_diffs, file_extension, format_diff_summary,
    parse_full_rewrite, Candidate, CandidateId, MutationError,
};
use evo_database::{DatabaseError, InsertOutcome, ProgramDatabase};
use evo_ensemble::{
    BackendError, Message, ModelBackend, ModelEnsemble, MutationMode, PromptBuilder,
};
use evo_evaluators::{CascadePipeline, EvalFailure, FitnessReport, StageEvaluator};

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::config::{ConfigError, RunConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("ensemble error: {0}")]
    Ensemble(#[from] evo_ensemble::EnsembleError),
    #[error("{backends} backends configured for {models} ensemble models")]
    BackendMismatch { backends: usize, models: usize },
    #[error("seed candidate failed evaluation: {0}")]
    SeedEvaluation(#[from] EvalFailure),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("output I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One line of the run's history log, written to `history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: u64,
    /// Model label that produced the mutation, or "none" when the model
    /// call itself failed.
    pub model: String,
    /// What became of the generation: `accepted`, `rejected_duplicate`,
    /// `rejected_inferior`, `errored`, or a skip reason.
    pub outcome: String,
    pub fitness: Option<f64>,
    pub best_fitness: f64,
    pub island_bests: Vec<f64>,
    /// Cumulative evaluations run so far, seed included. Skipped
    /// generations (model or mutation failures) do not count.
    pub evaluations: u64,
    pub duration_secs: f64,
}

/// Final accounting for a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub generations: u64,
    pub population: usize,
    pub archive_len: usize,
    pub best: Option<Candidate>,
    pub output_dir: PathBuf,
}

enum GenerationPayload {
    Scored {
        candidate: Candidate,
        report: FitnessReport,
        diff_summary: Option<String>,
    },
    Errored {
        candidate: Candidate,
        failure: EvalFailure,
    },
    BackendFailed(BackendError),
    MutationFailed(MutationError),
    MutationRejected {
        length: usize,
    },
    Unchanged,
}

struct TaskOutput {
    generation: u64,
    model: String,
    parent: CandidateId,
    payload: GenerationPayload,
    duration_secs: f64,
}

/// The engine aggregate: all run state under one owner.
pub struct Engine {
    config: RunConfig,
    db: ProgramDatabase,
    ensemble: ModelEnsemble,
    backends: Vec<Arc<dyn ModelBackend>>,
    pipeline: Arc<CascadePipeline>,
    rng: StdRng,
    language: String,
    completed: u64,
    evaluations: u64,
    history: Vec<GenerationRecord>,
    best_fitness: f64,
    output_dir: PathBuf,
}

impl Engine {
    /// Builds a fresh engine. `backends` must align one-to-one with the
    /// configured ensemble entries.
    pub fn new(
        config: RunConfig,
        backends: Vec<Arc<dyn ModelBackend>>,
        evaluator: Arc<dyn StageEvaluator>,
        output_dir: PathBuf,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let ensemble = ModelEnsemble::new(config.ensemble.clone())?;
        if backends.len() != ensemble.len() {
            return Err(EngineError::BackendMismatch {
                backends: backends.len(),
                models: ensemble.len(),
            });
        }
        std::fs::create_dir_all(&output_dir)?;

        let pipeline = Arc::new(CascadePipeline::new(evaluator, config.cascade.clone()));
        let rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(rand::random));
        let db = ProgramDatabase::new(config.database.clone());
        let language = config.language.clone();

        Ok(Self {
            config,
            db,
            ensemble,
            backends,
            pipeline,
            rng,
            language,
            completed: 0,
            evaluations: 0,
            history: Vec::new(),
            best_fitness: f64::NEG_INFINITY,
            output_dir,
        })
    }

    /// Rebuilds an engine from a checkpoint, continuing at the next
    /// generation with identical database and archive contents.
    pub fn resume(
        config: RunConfig,
        backends: Vec<Arc<dyn ModelBackend>>,
        evaluator: Arc<dyn StageEvaluator>,
        output_dir: PathBuf,
        checkpoint: Checkpoint,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::new(config, backends, evaluator, output_dir)?;
        engine.db = checkpoint.snapshot.restore()?;
        engine.rng = StdRng::seed_from_u64(checkpoint.rng_seed);
        engine.completed = checkpoint.generation;
        engine.best_fitness = engine
            .db
            .best()
            .and_then(|c| c.fitness)
            .unwrap_or(f64::NEG_INFINITY);
        engine.history = checkpoint.history;
        engine.evaluations = engine.history.last().map(|r| r.evaluations).unwrap_or(1);
        info!(
            generation = engine.completed,
            population = engine.db.population(),
            "resumed from checkpoint"
        );
        Ok(engine)
    }

    /// Scores the seed program once and plants a copy on every island.
    /// Must run before [`Engine::run`]; a run without a seed is fatal.
    pub async fn seed(&mut self, code: &str) -> Result<(), EngineError> {
        if self.language.is_empty() {
            self.language = detect_language(code).to_string();
        }

        let report = self.pipeline.run(code).await?;
        self.evaluations += 1;
        info!(fitness = report.fitness, "seed candidate scored");

        for island in 0..self.config.database.num_islands {
            let candidate = Candidate::seed(code, island)
                .with_fitness(report.fitness, report.metrics.clone());
            self.db.insert_seed(candidate);
        }
        self.best_fitness = report.fitness;
        self.write_best_artifacts()?;
        Ok(())
    }

    /// Runs generations until the budget is exhausted or `cancel` turns
    /// true. In-flight evaluations are always drained and inserted, so a
    /// cancelled run loses no scored candidate.
    pub async fn run(
        &mut self,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, EngineError> {
        if self.db.population() == 0 {
            return Err(EngineError::Database(DatabaseError::EmptyPopulation));
        }

        let parallel = self.config.parallel_evaluations;
        let target = self.config.max_iterations;
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut next_generation = self.completed;

        while next_generation < target && !*cancel.borrow() {
            while tasks.len() >= parallel {
                if let Some(joined) = tasks.join_next().await {
                    self.absorb(joined)?;
                }
            }
            next_generation += 1;
            self.dispatch(next_generation, &mut tasks)?;
        }

        if *cancel.borrow() {
            info!(in_flight = tasks.len(), "cancellation requested, draining");
        }
        while let Some(joined) = tasks.join_next().await {
            self.absorb(joined)?;
        }

        // The cadence may have just checkpointed this exact state; writing
        // again would burn another RNG seed and desync resumed runs.
        let interval = self.config.checkpoint_interval;
        if interval == 0 || self.completed == 0 || self.completed % interval != 0 {
            self.write_checkpoint()?;
        }
        self.write_history()?;

        Ok(RunSummary {
            generations: self.completed,
            population: self.db.population(),
            archive_len: self.db.archive().len(),
            best: self.db.best().cloned(),
            output_dir: self.output_dir.clone(),
        })
    }

    pub fn database(&self) -> &ProgramDatabase {
        &self.db
    }

    pub fn history(&self) -> &[GenerationRecord] {
        &self.history
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn mutation_mode(&self) -> MutationMode {
        if self.config.diff_based_evolution {
            MutationMode::Diff
        } else {
            MutationMode::Rewrite
        }
    }

    fn dispatch(
        &mut self,
        generation: u64,
        tasks: &mut JoinSet<TaskOutput>,
    ) -> Result<(), EngineError> {
        let selection = self.db.sample_parents(None, &mut self.rng)?;
        let (model_idx, entry) = self.ensemble.sample(&mut self.rng);
        let backend = self.backends[model_idx].clone();
        let model = entry.name.clone();

        let builder = PromptBuilder::new(self.mutation_mode(), self.language.clone());
        let system = builder.system_message();
        let prompt = builder.build(
            &selection.parent,
            &selection.archive_inspirations,
            &selection.island_inspirations,
        );
        debug!(
            generation,
            parent = %selection.parent.id,
            island = selection.island,
            model = %model,
            "generation dispatched"
        );

        let parent = selection.parent;
        let mode = self.mutation_mode();
        let language = self.language.clone();
        let max_code_length = self.config.max_code_length;
        let pipeline = self.pipeline.clone();

        tasks.spawn(async move {
            let started = Instant::now();
            let parent_id = parent.id;
            let payload = mutate_and_evaluate(
                backend,
                pipeline,
                system,
                prompt,
                parent,
                generation,
                model.clone(),
                mode,
                language,
                max_code_length,
            )
            .await;
            TaskOutput {
                generation,
                model,
                parent: parent_id,
                payload,
                duration_secs: started.elapsed().as_secs_f64(),
            }
        });
        Ok(())
    }

    fn absorb(
        &mut self,
        joined: Result<TaskOutput, tokio::task::JoinError>,
    ) -> Result<(), EngineError> {
        let output = match joined {
            Ok(output) => output,
            Err(e) => {
                // A panicked generation task is a lost generation, not a
                // lost run.
                warn!(error = %e, "generation task failed to complete");
                self.completed += 1;
                return Ok(());
            }
        };

        let generation = output.generation;
        let (outcome, fitness) = match output.payload {
            GenerationPayload::Scored {
                candidate,
                report,
                diff_summary,
            } => {
                self.evaluations += 1;
                let fitness = report.fitness;
                let candidate = candidate.with_fitness(fitness, report.metrics);
                let id = candidate.id;
                let outcome = self.db.insert(candidate);
                info!(
                    generation,
                    candidate = %id,
                    parent = %output.parent,
                    model = %output.model,
                    fitness,
                    stage2_ran = report.stage2_ran,
                    outcome = outcome.label(),
                    "candidate scored"
                );
                if let Some(summary) = diff_summary {
                    debug!(generation, %summary);
                }
                if matches!(outcome, InsertOutcome::Accepted { .. })
                    && fitness > self.best_fitness
                {
                    self.best_fitness = fitness;
                    self.write_best_artifacts()?;
                }
                (outcome.label().to_string(), Some(fitness))
            }
            GenerationPayload::Errored { candidate, failure } => {
                self.evaluations += 1;
                warn!(
                    generation,
                    candidate = %candidate.id,
                    failure = %failure,
                    "evaluation infrastructure failure"
                );
                self.db.record_errored(candidate);
                ("errored".to_string(), None)
            }
            GenerationPayload::BackendFailed(error) => {
                warn!(generation, model = %output.model, %error, "model call failed, skipping");
                ("backend_failed".to_string(), None)
            }
            GenerationPayload::MutationFailed(error) => {
                warn!(generation, model = %output.model, %error, "mutation failed, skipping");
                ("mutation_failed".to_string(), None)
            }
            GenerationPayload::MutationRejected { length } => {
                warn!(
                    generation,
                    length,
                    limit = self.config.max_code_length,
                    "mutation exceeds max_code_length, skipping"
                );
                ("mutation_rejected".to_string(), None)
            }
            GenerationPayload::Unchanged => {
                debug!(generation, "mutation left the program unchanged, skipping");
                ("unchanged".to_string(), None)
            }
        };

        self.completed += 1;
        self.history.push(GenerationRecord {
            generation,
            model: output.model,
            outcome,
            fitness,
            best_fitness: self.db.best().and_then(|c| c.fitness).unwrap_or(0.0),
            island_bests: self.db.island_bests(),
            evaluations: self.evaluations,
            duration_secs: output.duration_secs,
        });

        if self.config.migration_interval > 0
            && self.completed % self.config.migration_interval == 0
        {
            self.db.migrate(self.completed);
        }
        if self.config.checkpoint_interval > 0
            && self.completed % self.config.checkpoint_interval == 0
        {
            self.write_checkpoint()?;
        }
        Ok(())
    }

    /// Writes the checkpoint and reseeds the RNG from the stored seed, so
    /// a resume replays the exact random sequence an uninterrupted run
    /// would have drawn.
    fn write_checkpoint(&mut self) -> Result<(), EngineError> {
        let rng_seed: u64 = self.rng.gen();
        self.rng = StdRng::seed_from_u64(rng_seed);

        let checkpoint = Checkpoint {
            generation: self.completed,
            rng_seed,
            snapshot: self.db.snapshot(),
            history: self.history.clone(),
        };
        let path = self.checkpoint_path();
        checkpoint.save(&path)?;
        info!(generation = self.completed, path = %path.display(), "checkpoint written");
        Ok(())
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join("checkpoint.json")
    }

    fn write_best_artifacts(&self) -> Result<(), EngineError> {
        let Some(best) = self.db.best() else {
            return Ok(());
        };
        let extension = file_extension(&self.language);
        std::fs::write(self.output_dir.join(format!("best.{extension}")), &best.code)?;
        std::fs::write(
            self.output_dir.join("best_info.json"),
            serde_json::to_string_pretty(best).map_err(CheckpointError::from)?,
        )?;
        Ok(())
    }

    fn write_history(&self) -> Result<(), EngineError> {
        std::fs::write(
            self.output_dir.join("history.json"),
            serde_json::to_string_pretty(&self.history).map_err(CheckpointError::from)?,
        )?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn mutate_and_evaluate(
    backend: Arc<dyn ModelBackend>,
    pipeline: Arc<CascadePipeline>,
    system: String,
    prompt: String,
    parent: Candidate,
    generation: u64,
    model: String,
    mode: MutationMode,
    language: String,
    max_code_length: usize,
) -> GenerationPayload {
    let response = match backend.generate(&system, &[Message::user(prompt)]).await {
        Ok(response) => response,
        Err(error) => return GenerationPayload::BackendFailed(error),
    };

    let (child_code, diff_summary) = match mode {
        MutationMode::Diff => {
            let blocks = extract_diffs(&response);
            if blocks.is_empty() {
                return GenerationPayload::MutationFailed(MutationError::NoDiffBlocks);
            }
            match apply_diff_blocks(&parent.code, &blocks) {
                Ok(code) => (code, Some(format_diff_summary(&blocks))),
                Err(error) => return GenerationPayload::MutationFailed(error),
            }
        }
        MutationMode::Rewrite => match parse_full_rewrite(&response, &language) {
            Ok(code) => (code, None),
            Err(error) => return GenerationPayload::MutationFailed(error),
        },
    };

    if child_code == parent.code {
        return GenerationPayload::Unchanged;
    }
    if child_code.len() > max_code_length {
        return GenerationPayload::MutationRejected {
            length: child_code.len(),
        };
    }

    let candidate = Candidate::child(child_code, &parent, generation, model);
    match pipeline.run(&candidate.code).await {
        Ok(report) => GenerationPayload::Scored {
            candidate,
            report,
            diff_summary,
        },
        Err(failure) => GenerationPayload::Errored { candidate, failure },
    }
}
