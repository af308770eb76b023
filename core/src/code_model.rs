//! Domain types exchanged between the retrieval, auto-fix and learning
//! layers: code graph entities, retrieval results, fix proposals and the
//! records that track their verification and human review.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of a [`CodeNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Class,
    File,
}

/// A function, class or file vertex in the code graph.
///
/// `qualified_name` is the primary identity and is unique within a
/// `tenant_id`; the core never mutates a node once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeNode {
    pub qualified_name: String,
    pub name: String,
    pub kind: NodeKind,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub tenant_id: String,
}

impl CodeNode {
    /// `true` when `embedding` is present and matches `expected_dims`.
    pub fn embedding_matches_dims(&self, expected_dims: usize) -> bool {
        match &self.embedding {
            Some(vector) => vector.len() == expected_dims,
            None => true,
        }
    }
}

/// Typed relation between two [`CodeNode`]s, or between a [`Commit`] and a
/// file node for the `Modified` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Uses,
    Inherits,
    Imports,
    Contains,
    Modified,
}

impl EdgeKind {
    pub const RELATIONSHIP_KINDS: [EdgeKind; 5] = [
        EdgeKind::Calls,
        EdgeKind::Uses,
        EdgeKind::Inherits,
        EdgeKind::Imports,
        EdgeKind::Contains,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// Populated only for `Modified` edges (Commit -> File).
    #[serde(default)]
    pub committed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub short_sha: String,
    pub message_subject: String,
    pub author_name: String,
    pub author_email: String,
    pub committed_at: chrono::DateTime<chrono::Utc>,
    pub parent_shas: Vec<String>,
    pub changed_file_paths: Vec<String>,
    pub impact_score: f32,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub tenant_id: String,
}

/// A derived neighbor of a retrieved node, surfaced alongside its edge type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub qualified_name: String,
    pub edge_kind: EdgeKind,
}

/// One match returned from a retrieval call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub kind: NodeKind,
    pub qualified_name: String,
    pub name: String,
    /// Rendered snippet with surrounding context lines and a caret marker.
    pub code: String,
    pub score: f32,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RetrievalResult {
    /// Score is always clamped into `[0, 1]` at construction so downstream
    /// consumers never observe an out-of-range value.
    pub fn clamp_score(mut self) -> Self {
        self.score = self.score.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    Security,
    Simplify,
    Refactor,
    Extract,
    Remove,
    Documentation,
    TypeHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Deterministic numeric mapping used when scoring candidates.
    pub fn as_score(self) -> f32 {
        match self {
            Confidence::High => 1.0,
            Confidence::Medium => 0.7,
            Confidence::Low => 0.4,
        }
    }

    /// One step down; `Low` saturates at `Low`.
    pub fn step_down(self) -> Confidence {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium => Confidence::Low,
            Confidence::Low => Confidence::Low,
        }
    }

    /// One step up, capped at `Medium` — callers must never promote
    /// `Medium` to `High` automatically.
    pub fn step_up_capped_at_medium(self) -> Confidence {
        match self {
            Confidence::Low => Confidence::Medium,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A precomputed finding fed into `BestOfNGenerator`; the core only
/// consumes this type, it never computes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub line_start: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: String,
    pub original_code: String,
    pub fixed_code: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl CodeChange {
    /// Number of lines changed, used by the change-size scoring dimension.
    pub fn lines_changed(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line).saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
    Failed,
}

/// Tri-state outcome of a syntax check: a fix can be checked and found
/// valid, checked and found invalid, or simply never checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntaxValidity {
    Valid,
    Invalid,
    Unchecked,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub documentation_refs: Vec<String>,
    #[serde(default)]
    pub best_practice_notes: Vec<String>,
    #[serde(default)]
    pub similar_patterns: Vec<String>,
    #[serde(default)]
    pub rag_snippets: Vec<String>,
}

impl Evidence {
    /// Evidence-strength scoring dimension: `min(1, total / 6)`.
    pub fn strength_score(&self) -> f32 {
        let total = self.documentation_refs.len()
            + self.best_practice_notes.len()
            + self.similar_patterns.len();
        (total as f32 / 6.0).min(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixProposal {
    pub id: String,
    pub finding: Finding,
    pub fix_type: FixType,
    pub confidence: Confidence,
    pub changes: Vec<CodeChange>,
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub evidence: Evidence,
    pub syntax_valid: SyntaxValidity,
    pub status: FixStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl FixProposal {
    /// Total lines touched across all changes, used by the change-size
    /// scoring dimension and by §4.5's candidate ranking.
    pub fn total_lines_changed(&self) -> u32 {
        self.changes.iter().map(CodeChange::lines_changed).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub fix_id: String,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub tests_total: u32,
    pub syntax_valid: bool,
    #[serde(default)]
    pub import_valid: Option<bool>,
    #[serde(default)]
    pub type_valid: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl VerificationResult {
    pub fn test_pass_rate(&self) -> f32 {
        self.tests_passed as f32 / self.tests_total.max(1) as f32
    }

    /// Mean of the present tri-state booleans, counting an absent value's
    /// `false` branch as 0 (only `syntax_valid` is always present).
    pub fn validation_score(&self) -> f32 {
        let mut present = vec![self.syntax_valid];
        present.extend(self.import_valid);
        present.extend(self.type_valid);
        let sum: f32 = present.iter().map(|&ok| if ok { 1.0 } else { 0.0 }).sum();
        sum / present.len() as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approved,
    Rejected,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    StyleMismatch,
    TooRisky,
    IncorrectLogic,
    NotNeeded,
    BreaksTests,
    Other,
}

/// Immutable record of a human decision on a [`FixProposal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixDecision {
    pub id: String,
    pub fix_id: String,
    pub decision: DecisionKind,
    #[serde(default)]
    pub rejection_reason: Option<RejectionReason>,
    #[serde(default)]
    pub rejection_comment: Option<String>,
    pub fix_type: FixType,
    pub confidence: Confidence,
    pub finding_type: String,
    pub file_path: String,
    pub repository: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub characteristics: HashMap<String, String>,
}

impl FixDecision {
    /// Modified decisions count as approvals when computing approval rates.
    pub fn counts_as_approval(&self) -> bool {
        matches!(self.decision, DecisionKind::Approved | DecisionKind::Modified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Unavailable,
    Addon,
    Included,
}

/// Computed per request; never cached beyond a single `generate_fix` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub tier: Tier,
    pub access: AccessLevel,
    pub addon_enabled: bool,
    pub max_n: u32,
    /// `-1` means unlimited.
    pub monthly_runs_limit: i64,
    pub monthly_runs_used: i64,
}

impl Entitlement {
    pub fn is_available(&self) -> bool {
        matches!(self.access, AccessLevel::Included)
            || (matches!(self.access, AccessLevel::Addon) && self.addon_enabled)
    }

    pub fn is_within_limit(&self) -> bool {
        self.monthly_runs_limit < 0 || self.monthly_runs_used < self.monthly_runs_limit
    }

    pub fn remaining_runs(&self) -> i64 {
        if self.monthly_runs_limit < 0 {
            -1
        } else {
            (self.monthly_runs_limit - self.monthly_runs_used).max(0)
        }
    }
}
