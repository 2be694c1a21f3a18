//! Mutation prompt assembly.
//!
//! Builds the system and user messages for one mutation step from the
//! parent program, the archive's top performers, and the island's current
//! best members. The instructions section switches between SEARCH/REPLACE
//! diff output and full-rewrite output depending on the evolution mode.

use std::fmt::Write;

use evo_core::{parse_evolve_blocks, Candidate};

/// How the model's response will be applied to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    /// Response is one or more SEARCH/REPLACE blocks.
    Diff,
    /// Response is a complete replacement program.
    Rewrite,
}

/// Assembles prompts for the mutation step.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    mode: MutationMode,
    /// Code-fence tag, e.g. "rust" or "python". Empty for plain fences.
    language: String,
}

impl PromptBuilder {
    pub fn new(mode: MutationMode, language: impl Into<String>) -> Self {
        Self {
            mode,
            language: language.into(),
        }
    }

    pub fn mode(&self) -> MutationMode {
        self.mode
    }

    pub fn system_message(&self) -> String {
        let mut out = String::from(
            "You are an expert programmer improving a program through small, \
             targeted changes. Each change must keep the program correct while \
             improving its measured performance. Lower runtime and lower build \
             overhead both count.",
        );
        match self.mode {
            MutationMode::Diff => out.push_str(
                " Respond with SEARCH/REPLACE blocks only, no surrounding \
                 explanation.",
            ),
            MutationMode::Rewrite => out.push_str(
                " Respond with the complete improved program in a single \
                 fenced code block, no surrounding explanation.",
            ),
        }
        out
    }

    /// The user message for one mutation of `parent`.
    ///
    /// `archive_inspirations` are cross-island all-time bests,
    /// `island_inspirations` the parent's current island neighbors; both may
    /// be empty early in a run.
    pub fn build(
        &self,
        parent: &Candidate,
        archive_inspirations: &[Candidate],
        island_inspirations: &[Candidate],
    ) -> String {
        let mut out = String::with_capacity(4096);

        writeln!(out, "# Current program").unwrap();
        writeln!(out, "Fitness: {}", fitness_label(parent)).unwrap();
        if !parent.metrics.is_empty() {
            let metrics: Vec<String> = parent
                .metrics
                .iter()
                .map(|(k, v)| format!("{k}={v:.4}"))
                .collect();
            writeln!(out, "Metrics: {}", metrics.join(", ")).unwrap();
        }
        writeln!(out).unwrap();
        self.push_code(&mut out, &parent.code);

        let evolve_blocks = parse_evolve_blocks(&parent.code);
        if !evolve_blocks.is_empty() {
            writeln!(
                out,
                "\nOnly the code between EVOLVE-BLOCK-START and \
                 EVOLVE-BLOCK-END markers may be changed. Everything outside \
                 those markers is fixed infrastructure."
            )
            .unwrap();
        }

        if !archive_inspirations.is_empty() {
            writeln!(out, "\n# Best programs found so far").unwrap();
            for candidate in archive_inspirations {
                writeln!(out, "\nFitness: {}", fitness_label(candidate)).unwrap();
                self.push_code(&mut out, &candidate.code);
            }
        }

        if !island_inspirations.is_empty() {
            writeln!(out, "\n# Other strong programs in this population").unwrap();
            for candidate in island_inspirations {
                writeln!(out, "\nFitness: {}", fitness_label(candidate)).unwrap();
                self.push_code(&mut out, &candidate.code);
            }
        }

        writeln!(out, "\n# Task").unwrap();
        match self.mode {
            MutationMode::Diff => writeln!(
                out,
                "Propose an improvement to the current program as one or more \
                 SEARCH/REPLACE blocks:\n\n\
                 <<<<<<< SEARCH\n\
                 lines copied exactly from the current program\n\
                 =======\n\
                 replacement lines\n\
                 >>>>>>> REPLACE\n\n\
                 The SEARCH text must match the current program exactly, \
                 including whitespace. Keep changes focused; do not rewrite \
                 unrelated code."
            )
            .unwrap(),
            MutationMode::Rewrite => writeln!(
                out,
                "Rewrite the program to improve its fitness. Return the \
                 complete program in a single fenced code block."
            )
            .unwrap(),
        }

        out
    }

    fn push_code(&self, out: &mut String, code: &str) {
        writeln!(out, "```{}", self.language).unwrap();
        writeln!(out, "{code}").unwrap();
        writeln!(out, "```").unwrap();
    }
}

fn fitness_label(candidate: &Candidate) -> String {
    match candidate.fitness {
        Some(f) => format!("{f:.4}"),
        None => "unscored".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scored(code: &str, fitness: f64) -> Candidate {
        Candidate::seed(code, 0).with_fitness(fitness, BTreeMap::new())
    }

    #[test]
    fn diff_prompt_describes_the_block_format() {
        let builder = PromptBuilder::new(MutationMode::Diff, "rust");
        let prompt = builder.build(&scored("fn main() {}", 1.0), &[], &[]);
        assert!(prompt.contains("<<<<<<< SEARCH"));
        assert!(prompt.contains(">>>>>>> REPLACE"));
        assert!(prompt.contains("```rust"));
        assert!(prompt.contains("Fitness: 1.0000"));
    }

    #[test]
    fn rewrite_prompt_asks_for_a_complete_program() {
        let builder = PromptBuilder::new(MutationMode::Rewrite, "python");
        let prompt = builder.build(&scored("x = 1", 0.5), &[], &[]);
        assert!(prompt.contains("complete program"));
        assert!(!prompt.contains("<<<<<<< SEARCH"));
    }

    #[test]
    fn inspirations_appear_with_their_fitness() {
        let builder = PromptBuilder::new(MutationMode::Diff, "");
        let parent = scored("parent code", 1.0);
        let archive = vec![scored("archive code", 3.0)];
        let island = vec![scored("island code", 2.0)];
        let prompt = builder.build(&parent, &archive, &island);

        assert!(prompt.contains("Best programs found so far"));
        assert!(prompt.contains("archive code"));
        assert!(prompt.contains("Fitness: 3.0000"));
        assert!(prompt.contains("Other strong programs"));
        assert!(prompt.contains("island code"));
    }

    #[test]
    fn evolve_markers_are_advertised_when_present() {
        let builder = PromptBuilder::new(MutationMode::Diff, "python");
        let marked = scored(
            "setup\n# EVOLVE-BLOCK-START\nbody\n# EVOLVE-BLOCK-END\nteardown",
            1.0,
        );
        let prompt = builder.build(&marked, &[], &[]);
        assert!(prompt.contains("EVOLVE-BLOCK-START"));

        let plain = scored("no markers here", 1.0);
        let prompt = builder.build(&plain, &[], &[]);
        assert!(!prompt.contains("fixed infrastructure"));
    }

    #[test]
    fn unscored_parent_reads_as_unscored() {
        let builder = PromptBuilder::new(MutationMode::Diff, "");
        let prompt = builder.build(&Candidate::seed("code", 0), &[], &[]);
        assert!(prompt.contains("Fitness: unscored"));
    }

    #[test]
    fn system_message_matches_mode() {
        let diff = PromptBuilder::new(MutationMode::Diff, "rust").system_message();
        assert!(diff.contains("SEARCH/REPLACE"));
        let rewrite = PromptBuilder::new(MutationMode::Rewrite, "rust").system_message();
        assert!(rewrite.contains("fenced code block"));
    }
}
