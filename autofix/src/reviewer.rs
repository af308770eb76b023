//! Text rendering of a `FixProposal` for human review. Grounded on
//! `repotoire/autofix/reviewer.py`'s `_show_metadata`/`_show_evidence`/
//! `_show_code_change`: this crate renders the same sections as plain text
//! and leaves the interactive prompt/approval loop to the out-of-scope
//! CLI/HTTP surface.

use std::fmt::Write as _;

use alayasiki_core::code_model::{CodeChange, Evidence, FixProposal};
use similar::TextDiff;

/// A rendered, ready-to-display view of a `FixProposal`: metadata, the
/// evidence backing it, and a unified diff per changed file.
#[derive(Debug, Clone, PartialEq)]
pub struct FixSummary {
    pub header: String,
    pub description: String,
    pub rationale: String,
    pub evidence: String,
    pub diffs: Vec<FileDiff>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDiff {
    pub file_path: String,
    pub unified_diff: String,
}

impl FixSummary {
    /// Concatenates every section into one block, in the order
    /// `reviewer.py`'s `review_fix` prints them: metadata, description,
    /// rationale, evidence, then each file's diff.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.header);
        let _ = writeln!(out);
        let _ = writeln!(out, "Description:\n{}", self.description);
        let _ = writeln!(out);
        let _ = writeln!(out, "Rationale:\n{}", self.rationale);
        if !self.evidence.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", self.evidence);
        }
        for diff in &self.diffs {
            let _ = writeln!(out);
            let _ = writeln!(out, "Change: {}", diff.file_path);
            let _ = write!(out, "{}", diff.unified_diff);
        }
        out
    }
}

/// Builds a `FixSummary` from a proposal, the way `reviewer.py`'s
/// `review_fix` assembles a review screen before prompting for approval.
pub fn summarize(proposal: &FixProposal) -> FixSummary {
    FixSummary {
        header: render_metadata(proposal),
        description: proposal.description.clone(),
        rationale: proposal.rationale.clone(),
        evidence: render_evidence(&proposal.evidence),
        diffs: proposal.changes.iter().map(render_change_diff).collect(),
    }
}

fn render_metadata(proposal: &FixProposal) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Fix {}", proposal.id);
    let _ = writeln!(out, "Issue: {}", proposal.finding.title);
    let _ = writeln!(out, "Severity: {:?}", proposal.finding.severity);
    let _ = writeln!(out, "Fix Type: {:?}", proposal.fix_type);
    let _ = writeln!(out, "Confidence: {:?}", proposal.confidence);
    let _ = write!(out, "Files: {}", proposal.finding.affected_files.join(", "));
    out
}

/// Mirrors `_show_evidence`'s four labeled sections, each printed only when
/// non-empty; returns an empty string when no evidence at all is present.
fn render_evidence(evidence: &Evidence) -> String {
    let mut out = String::new();

    if !evidence.documentation_refs.is_empty() {
        let _ = writeln!(out, "Documentation & Standards:");
        for item in &evidence.documentation_refs {
            let _ = writeln!(out, "  - {item}");
        }
    }
    if !evidence.best_practice_notes.is_empty() {
        let _ = writeln!(out, "Best Practices:");
        for item in &evidence.best_practice_notes {
            let _ = writeln!(out, "  - {item}");
        }
    }
    if !evidence.similar_patterns.is_empty() {
        let _ = writeln!(out, "Similar Patterns in Codebase:");
        for item in &evidence.similar_patterns {
            let _ = writeln!(out, "  - {item}");
        }
    }
    if !evidence.rag_snippets.is_empty() {
        let _ = writeln!(out, "Related Code (RAG): {} snippet(s)", evidence.rag_snippets.len());
    }

    out.trim_end().to_string()
}

fn render_change_diff(change: &CodeChange) -> FileDiff {
    let diff = TextDiff::from_lines(&change.original_code, &change.fixed_code);
    let mut unified_diff = String::new();
    let _ = writeln!(unified_diff, "--- a/{}", change.file_path);
    let _ = writeln!(unified_diff, "+++ b/{}", change.file_path);
    for hunk in diff.unified_diff().iter_hunks() {
        let _ = writeln!(unified_diff, "{hunk}");
    }

    FileDiff { file_path: change.file_path.clone(), unified_diff }
}
