//! Parsing and applying model-proposed code changes.
//!
//! Models respond in one of two shapes. Diff-based evolution expects one or
//! more SEARCH/REPLACE blocks:
//!
//! ```text
//! <<<<<<< SEARCH
//! lines copied verbatim from the parent
//! =======
//! lines to put in their place
//! >>>>>>> REPLACE
//! ```
//!
//! Full-rewrite evolution expects a fenced code block containing the entire
//! replacement program. Both parsers are strict about producing either a
//! usable child program or a [`MutationError`]; a mutation that cannot be
//! applied is skipped by the caller, never retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const DIVIDER_MARKER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Marker comments delimiting the editable region of a seed program.
/// Text outside these markers is shown to the model but never rewritten.
pub const EVOLVE_START: &str = "EVOLVE-BLOCK-START";
pub const EVOLVE_END: &str = "EVOLVE-BLOCK-END";

/// One SEARCH/REPLACE pair extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffBlock {
    pub search: String,
    pub replace: String,
}

/// A region of a seed program marked editable with evolve-block comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolveBlock {
    /// Zero-based line of the start marker.
    pub start_line: usize,
    /// Zero-based line of the end marker.
    pub end_line: usize,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("response contained no SEARCH/REPLACE blocks")]
    NoDiffBlocks,
    #[error("SEARCH section is empty")]
    EmptySearch,
    #[error("SEARCH text not found in parent (starts {snippet:?})")]
    DiffNoMatch { snippet: String },
    #[error("response contained no code")]
    NoCode,
}

/// Extracts every well-formed SEARCH/REPLACE block, in response order.
///
/// Markers are recognized on their own line, ignoring surrounding
/// whitespace. An unterminated trailing block is dropped; stray marker
/// lines inside a section are kept as section content.
pub fn extract_diffs(response: &str) -> Vec<DiffBlock> {
    enum State {
        Outside,
        Search,
        Replace,
    }

    let mut blocks = Vec::new();
    let mut state = State::Outside;
    let mut search: Vec<&str> = Vec::new();
    let mut replace: Vec<&str> = Vec::new();

    for line in response.lines() {
        let marker = line.trim();
        match state {
            State::Outside => {
                if marker == SEARCH_MARKER {
                    search.clear();
                    replace.clear();
                    state = State::Search;
                }
            }
            State::Search => {
                if marker == DIVIDER_MARKER {
                    state = State::Replace;
                } else {
                    search.push(line);
                }
            }
            State::Replace => {
                if marker == REPLACE_MARKER {
                    blocks.push(DiffBlock {
                        search: search.join("\n"),
                        replace: replace.join("\n"),
                    });
                    search.clear();
                    replace.clear();
                    state = State::Outside;
                } else {
                    replace.push(line);
                }
            }
        }
    }

    blocks
}

/// Applies `blocks` to `parent` in order, each block seeing the output of
/// the previous one.
///
/// A block's SEARCH section must match a consecutive run of whole lines in
/// the current text; only the first occurrence is replaced. An empty REPLACE
/// section deletes the matched lines. Any block that is whitespace-only or
/// fails to match aborts the whole mutation.
pub fn apply_diff_blocks(parent: &str, blocks: &[DiffBlock]) -> Result<String, MutationError> {
    let mut lines: Vec<String> = parent.split('\n').map(str::to_string).collect();

    for block in blocks {
        let search_lines: Vec<&str> = block.search.split('\n').collect();
        if search_lines.iter().all(|l| l.trim().is_empty()) {
            return Err(MutationError::EmptySearch);
        }
        let replace_lines: Vec<String> = if block.replace.is_empty() {
            Vec::new()
        } else {
            block.replace.split('\n').map(str::to_string).collect()
        };

        let n = search_lines.len();
        if n > lines.len() {
            return Err(MutationError::DiffNoMatch {
                snippet: snippet(&block.search),
            });
        }
        let position = (0..=lines.len() - n)
            .find(|&i| (0..n).all(|j| lines[i + j] == search_lines[j]));
        match position {
            Some(i) => {
                lines.splice(i..i + n, replace_lines);
            }
            None => {
                return Err(MutationError::DiffNoMatch {
                    snippet: snippet(&block.search),
                });
            }
        }
    }

    Ok(lines.join("\n"))
}

/// Extracts the diff blocks from `response` and applies them to `parent`.
pub fn apply_diff(parent: &str, response: &str) -> Result<String, MutationError> {
    let blocks = extract_diffs(response);
    if blocks.is_empty() {
        return Err(MutationError::NoDiffBlocks);
    }
    apply_diff_blocks(parent, &blocks)
}

/// Pulls a complete replacement program out of a full-rewrite response.
///
/// Tries, in order: a fence tagged with `language`, any fenced block with
/// its tag line dropped, then the whole response trimmed. Fails with
/// [`MutationError::NoCode`] only when all three come up empty.
pub fn parse_full_rewrite(response: &str, language: &str) -> Result<String, MutationError> {
    if !language.is_empty() {
        let tag = format!("```{language}");
        if let Some(start) = response.find(&tag) {
            let after = &response[start + tag.len()..];
            // The tag must end its line so "rust" does not match "rustler".
            if after.starts_with('\n') || after.starts_with("\r\n") {
                if let Some(end) = after.find("```") {
                    let code = after[..end].trim_matches('\n');
                    if !code.trim().is_empty() {
                        return Ok(code.to_string());
                    }
                }
            }
        }
    }

    if let Some(start) = response.find("```") {
        let after = &response[start + 3..];
        if let Some(end) = after.find("```") {
            let block = &after[..end];
            let code = match block.find('\n') {
                Some(i) => &block[i + 1..],
                None => block,
            };
            let code = code.trim_end_matches('\n');
            if !code.trim().is_empty() {
                return Ok(code.to_string());
            }
        }
    }

    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(MutationError::NoCode);
    }
    Ok(trimmed.to_string())
}

/// One line per block, suitable for logs and generation history.
pub fn format_diff_summary(blocks: &[DiffBlock]) -> String {
    let mut parts = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        let search_lines: Vec<&str> = block.search.split('\n').collect();
        let replace_lines: Vec<&str> = block.replace.split('\n').collect();
        if search_lines.len() == 1 && replace_lines.len() == 1 {
            parts.push(format!(
                "Change {}: '{}' to '{}'",
                i + 1,
                search_lines[0].trim(),
                replace_lines[0].trim()
            ));
        } else {
            parts.push(format!(
                "Change {}: replaced {} lines with {} lines",
                i + 1,
                search_lines.len(),
                replace_lines.len()
            ));
        }
    }
    parts.join("\n")
}

/// Finds the editable regions of a seed program.
///
/// A block opens at a line containing [`EVOLVE_START`] and closes at the
/// next line containing [`EVOLVE_END`]; the markers themselves are not part
/// of the block's code. An unclosed block is ignored.
pub fn parse_evolve_blocks(code: &str) -> Vec<EvolveBlock> {
    let mut blocks = Vec::new();
    let mut start: Option<usize> = None;
    let mut content: Vec<&str> = Vec::new();

    for (i, line) in code.split('\n').enumerate() {
        if line.contains(EVOLVE_START) {
            start = Some(i);
            content.clear();
        } else if line.contains(EVOLVE_END) {
            if let Some(start_line) = start.take() {
                blocks.push(EvolveBlock {
                    start_line,
                    end_line: i,
                    code: content.join("\n"),
                });
                content.clear();
            }
        } else if start.is_some() {
            content.push(line);
        }
    }

    blocks
}

/// Removes evolve-block marker lines, leaving the code itself intact.
/// Programs without markers pass through unchanged.
pub fn strip_evolve_markers(code: &str) -> String {
    code.split('\n')
        .filter(|line| !line.contains(EVOLVE_START) && !line.contains(EVOLVE_END))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Best-effort language guess from the first recognizable line of code.
/// Returns "" when nothing matches; callers treat that as plain text.
pub fn detect_language(code: &str) -> &'static str {
    for line in code.lines() {
        let t = line.trim_start();
        if t.starts_with("#include") || t.starts_with("template<") || t.starts_with("template <")
        {
            return "cpp";
        }
        if t.starts_with("fn ")
            || t.starts_with("pub fn ")
            || (t.starts_with("use ") && t.contains("::"))
        {
            return "rust";
        }
        if t.starts_with("def ")
            || (t.starts_with("class ") && t.trim_end().ends_with(':'))
            || t.starts_with("from ")
            || (t.starts_with("import ") && !t.contains('{'))
        {
            return "python";
        }
        if t.starts_with("function ") || (t.starts_with("const ") && t.contains("=>")) {
            return "javascript";
        }
        if t.starts_with("package ") || t.starts_with("func ") {
            return "go";
        }
    }
    ""
}

/// File extension (without the dot) used when writing a candidate to disk.
pub fn file_extension(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "rust" => "rs",
        "javascript" => "js",
        "cpp" => "cpp",
        "go" => "go",
        _ => "txt",
    }
}

fn snippet(text: &str) -> String {
    let first = text.lines().next().unwrap_or("");
    first.chars().take(60).collect()
}
