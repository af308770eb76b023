//! Scores and ranks verified candidates. Weights and filters follow the
//! Best-of-N selection rules: test pass rate 0.35, validation 0.20, evidence
//! strength 0.10, quality 0.10, model confidence 0.15, change size 0.10.

use alayasiki_core::code_model::{Confidence, Evidence, FixProposal, VerificationResult};

pub const WEIGHT_TEST_PASS_RATE: f32 = 0.35;
pub const WEIGHT_VALIDATION: f32 = 0.20;
pub const WEIGHT_EVIDENCE: f32 = 0.10;
pub const WEIGHT_QUALITY: f32 = 0.10;
pub const WEIGHT_CONFIDENCE: f32 = 0.15;
pub const WEIGHT_CHANGE_SIZE: f32 = 0.10;

/// The change-size dimension rewards smaller diffs, saturating at
/// `LARGE_CHANGE_LINES` lines.
const LARGE_CHANGE_LINES: f32 = 50.0;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub proposal: FixProposal,
    pub verification: VerificationResult,
    /// A cheap readability/clarity proxy: non-empty `description` and
    /// `rationale` each contribute half; a fully-documented candidate
    /// scores 1.0.
    pub quality_score: f32,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f32,
}

pub fn quality_score(description: &str, rationale: &str) -> f32 {
    let mut score = 0.0;
    if !description.trim().is_empty() {
        score += 0.5;
    }
    if !rationale.trim().is_empty() {
        score += 0.5;
    }
    score
}

fn change_size_score(proposal: &FixProposal) -> f32 {
    let lines = proposal.total_lines_changed() as f32;
    (1.0 - (lines / LARGE_CHANGE_LINES)).clamp(0.0, 1.0)
}

fn evidence_score(evidence: &Evidence) -> f32 {
    evidence.strength_score()
}

/// Whether a verified candidate is even eligible for scoring: it must have
/// compiled/sandboxed cleanly, and, if configured, have met the minimum
/// test pass rate and/or passed every test.
pub fn passes_gates(
    verification: &VerificationResult,
    min_test_pass_rate: f32,
    require_all_tests_pass: bool,
) -> bool {
    if !verification.syntax_valid || verification.error.is_some() {
        return false;
    }
    if verification.import_valid == Some(false) {
        return false;
    }
    if verification.test_pass_rate() < min_test_pass_rate {
        return false;
    }
    if require_all_tests_pass && verification.tests_failed > 0 {
        return false;
    }
    true
}

pub fn score_candidate(candidate: &Candidate) -> f32 {
    let verification = &candidate.verification;
    WEIGHT_TEST_PASS_RATE * verification.test_pass_rate()
        + WEIGHT_VALIDATION * verification.validation_score()
        + WEIGHT_EVIDENCE * evidence_score(&candidate.proposal.evidence)
        + WEIGHT_QUALITY * candidate.quality_score
        + WEIGHT_CONFIDENCE * candidate.proposal.confidence.as_score()
        + WEIGHT_CHANGE_SIZE * change_size_score(&candidate.proposal)
}

/// Ranks `candidates` highest score first, breaking ties by test pass rate
/// then by smaller total change size then by `fix_id` for determinism.
pub fn rank(candidates: Vec<Candidate>) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let score = score_candidate(&candidate);
            ScoredCandidate { candidate, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.candidate
                    .verification
                    .test_pass_rate()
                    .partial_cmp(&a.candidate.verification.test_pass_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                a.candidate
                    .proposal
                    .total_lines_changed()
                    .cmp(&b.candidate.proposal.total_lines_changed())
            })
            .then_with(|| a.candidate.proposal.id.cmp(&b.candidate.proposal.id))
    });

    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use alayasiki_core::code_model::{CodeChange, FixStatus, FixType, Severity, SyntaxValidity};

    fn finding() -> alayasiki_core::code_model::Finding {
        alayasiki_core::code_model::Finding {
            title: "t".to_string(),
            description: "d".to_string(),
            severity: Severity::Medium,
            affected_files: vec!["a.py".to_string()],
            line_start: None,
        }
    }

    fn proposal(id: &str, confidence: Confidence, lines: u32) -> FixProposal {
        FixProposal {
            id: id.to_string(),
            finding: finding(),
            fix_type: FixType::Simplify,
            confidence,
            changes: vec![CodeChange {
                file_path: "a.py".to_string(),
                original_code: "x".to_string(),
                fixed_code: "y".to_string(),
                start_line: 1,
                end_line: lines,
            }],
            title: "Fix".to_string(),
            description: "desc".to_string(),
            rationale: "because".to_string(),
            evidence: Evidence::default(),
            syntax_valid: SyntaxValidity::Valid,
            status: FixStatus::Pending,
            created_at: chrono::Utc::now(),
            applied_at: None,
            metadata: Default::default(),
        }
    }

    fn verification(fix_id: &str, passed: u32, failed: u32) -> VerificationResult {
        VerificationResult {
            fix_id: fix_id.to_string(),
            tests_passed: passed,
            tests_failed: failed,
            tests_total: passed + failed,
            syntax_valid: true,
            import_valid: Some(true),
            type_valid: None,
            error: None,
            duration_ms: 10,
        }
    }

    #[test]
    fn higher_test_pass_rate_ranks_first() {
        let a = Candidate {
            proposal: proposal("a", Confidence::Medium, 5),
            verification: verification("a", 10, 0),
            quality_score: 1.0,
        };
        let b = Candidate {
            proposal: proposal("b", Confidence::Medium, 5),
            verification: verification("b", 5, 5),
            quality_score: 1.0,
        };

        let ranked = rank(vec![b, a]);
        assert_eq!(ranked[0].candidate.proposal.id, "a");
    }

    #[test]
    fn gate_rejects_syntax_invalid_candidates() {
        let mut verification = verification("a", 10, 0);
        verification.syntax_valid = false;
        assert!(!passes_gates(&verification, 0.0, false));
    }

    #[test]
    fn gate_enforces_require_all_tests_pass() {
        let verification = verification("a", 9, 1);
        assert!(!passes_gates(&verification, 0.0, true));
        assert!(passes_gates(&verification, 0.0, false));
    }

    #[test]
    fn tie_breaks_by_smaller_change_size_then_id() {
        let a = Candidate {
            proposal: proposal("a", Confidence::Medium, 10),
            verification: verification("a", 10, 0),
            quality_score: 1.0,
        };
        let b = Candidate {
            proposal: proposal("b", Confidence::Medium, 2),
            verification: verification("b", 10, 0),
            quality_score: 1.0,
        };

        let ranked = rank(vec![a, b]);
        assert_eq!(ranked[0].candidate.proposal.id, "b");
    }
}
