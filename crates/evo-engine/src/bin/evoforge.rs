//! evoforge — evolutionary program optimization driven by an LLM ensemble.
//!
//! Loads a run configuration, seeds the population from an initial program,
//! and evolves it: island-model population, weighted model ensemble for
//! mutations, cascade evaluation through an external command, periodic
//! checkpoints that a later invocation can resume from.
//!
//! # Usage
//!
//! ```bash
//! evoforge --config run.json --seed-program initial.py
//! evoforge --config run.json --output-dir runs/attempt2 --resume
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use evo_engine::{Checkpoint, Engine, RunConfig, RunSummary};
use evo_ensemble::{HttpBackend, ModelBackend};
use evo_evaluators::CommandEvaluator;

/// Evolve a program against an external evaluation command.
#[derive(Parser, Debug)]
#[command(name = "evoforge")]
#[command(about = "Evolutionary program optimization with an LLM ensemble")]
struct Cli {
    /// Run configuration file (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Initial program to evolve. Required unless resuming.
    #[arg(long)]
    seed_program: Option<PathBuf>,

    /// Resume from <output-dir>/checkpoint.json instead of seeding.
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Output directory for checkpoints and best-program artifacts.
    #[arg(long, default_value = "evoforge_output")]
    output_dir: PathBuf,

    /// Override the configured generation budget.
    #[arg(long)]
    iterations: Option<u64>,

    /// Override the configured RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn fatal(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = match RunConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => fatal(e),
    };
    if let Some(iterations) = cli.iterations {
        config.max_iterations = iterations;
    }
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }

    let mut backends: Vec<Arc<dyn ModelBackend>> = Vec::with_capacity(config.ensemble.len());
    for entry in &config.ensemble {
        match HttpBackend::new(entry.connection.clone()) {
            Ok(backend) => backends.push(Arc::new(backend)),
            Err(e) => fatal(format!("model {:?}: {e}", entry.name)),
        }
    }

    let evaluator = Arc::new(CommandEvaluator::new(config.evaluator.clone()));

    println!("\n{}", "=".repeat(70));
    println!(
        "evoforge: {} generations, {} islands, {} models, {} parallel evals",
        config.max_iterations,
        config.database.num_islands,
        config.ensemble.len(),
        config.parallel_evaluations,
    );
    println!(
        "Mutation: {} | Cascade: {} | Evaluator: {}",
        if config.diff_based_evolution { "diff" } else { "rewrite" },
        config.cascade.cascade_evaluation,
        config.evaluator.program,
    );
    println!("Models:");
    for entry in &config.ensemble {
        println!(
            "  {} (weight {}, {})",
            entry.name, entry.weight, entry.connection.model
        );
    }
    println!("{}", "=".repeat(70));

    let mut engine = if cli.resume {
        let path = cli.output_dir.join("checkpoint.json");
        let checkpoint = match Checkpoint::load(&path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => fatal(format!("cannot resume from {}: {e}", path.display())),
        };
        println!(
            "Resuming from {} at generation {}",
            path.display(),
            checkpoint.generation
        );
        match Engine::resume(config, backends, evaluator, cli.output_dir.clone(), checkpoint) {
            Ok(engine) => engine,
            Err(e) => fatal(e),
        }
    } else {
        let seed_path = match cli.seed_program {
            Some(ref path) => path,
            None => fatal("--seed-program is required unless --resume is set"),
        };
        let seed_code = match std::fs::read_to_string(seed_path) {
            Ok(code) => code,
            Err(e) => fatal(format!("cannot read {}: {e}", seed_path.display())),
        };
        let mut engine =
            match Engine::new(config, backends, evaluator, cli.output_dir.clone()) {
                Ok(engine) => engine,
                Err(e) => fatal(e),
            };
        if let Err(e) = engine.seed(&seed_code).await {
            fatal(e);
        }
        engine
    };

    // Ctrl-C flips the cancellation flag; the engine drains in-flight
    // evaluations and checkpoints before returning.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight evaluations");
            let _ = cancel_tx.send(true);
        } else {
            // Keep the sender alive so the receiver never reads a closed
            // channel as cancellation.
            std::future::pending::<()>().await;
        }
    });

    let summary = match engine.run(cancel_rx).await {
        Ok(summary) => summary,
        Err(e) => fatal(e),
    };

    print_summary(&summary);
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "=".repeat(70));
    println!("Evolution Complete");
    println!("{}", "=".repeat(70));
    println!("  Generations:  {}", summary.generations);
    println!("  Population:   {}", summary.population);
    println!("  Archive size: {}", summary.archive_len);
    match summary.best {
        Some(ref best) => {
            println!("  Best fitness: {:.4}", best.fitness_or_zero());
            println!("  Best id:      {}", best.id);
            println!("  Best model:   {}", best.model);
            println!("  Generation:   {}", best.generation);
            for (key, value) in &best.metrics {
                println!("    {key}: {value:.4}");
            }
        }
        None => println!("  No candidate survived evaluation."),
    }
    println!("  Output:       {}", summary.output_dir.display());
}
