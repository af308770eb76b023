//! `BestOfNGenerator`: the orchestration entry point. Generates N candidate
//! fixes concurrently (bounded by `max_concurrent_sandboxes`, following the
//! semaphore-gated `buffer_unordered` pattern used for scenario evaluation
//! elsewhere in the corpus), verifies each in a sandbox, scores the
//! survivors, and returns the best.

use std::path::Path;
use std::sync::Arc;

use alayasiki_core::code_model::{
    Confidence, Entitlement, Finding, FixProposal, FixStatus, FixType, Severity, SyntaxValidity,
};
use alayasiki_core::config::AutoFixConfig;
use alayasiki_core::entitlements::Entitlements;
use alayasiki_core::llm::Llm;
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::error::AutoFixError;
use crate::prompt::{build_request, parse_model_output, ParsedFix};
use crate::sandbox::Sandbox;
use crate::scorer::{self, Candidate, ScoredCandidate};
use crate::syntax::syntax_check;

const GENERATION_TEMPERATURE: f32 = 0.7;

#[derive(Debug)]
pub struct GenerationOutcome {
    pub proposal: FixProposal,
    /// Accounting is side-effect free (`Entitlements` holds no state), so a
    /// successful run returns the entitlement the caller should persist.
    pub updated_entitlement: Entitlement,
}

pub struct BestOfNGenerator {
    llm: Arc<dyn Llm>,
    sandbox: Arc<dyn Sandbox>,
    entitlements: Entitlements,
}

impl BestOfNGenerator {
    pub fn new(llm: Arc<dyn Llm>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { llm, sandbox, entitlements: Entitlements::new() }
    }

    pub async fn generate(
        &self,
        finding: &Finding,
        repo_path: &Path,
        rag_snippets: &[String],
        historical_feedback: Option<&str>,
        config: &AutoFixConfig,
        entitlement: &Entitlement,
    ) -> Result<GenerationOutcome, AutoFixError> {
        let now = chrono::Utc::now();
        self.entitlements.check(entitlement, now)?;

        let n = self.entitlements.clamp_n(config.n, entitlement);
        let base_seed = rand::random::<u64>();
        let timeout = std::time::Duration::from_secs(config.test_timeout_secs);

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_sandboxes.max(1)));
        let tasks: Vec<_> = (0..n)
            .map(|index| {
                let semaphore = semaphore.clone();
                let seed = base_seed.wrapping_add(index as u64);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                    self.generate_one_candidate(
                        finding,
                        repo_path,
                        rag_snippets,
                        historical_feedback,
                        &config.test_command,
                        &config.import_check_command,
                        timeout,
                        seed,
                        index,
                    )
                    .await
                }
            })
            .collect();

        let candidates: Vec<Candidate> = stream::iter(tasks)
            .buffer_unordered(config.max_concurrent_sandboxes.max(1))
            .filter_map(|candidate| async move { candidate })
            .collect()
            .await;

        let eligible: Vec<Candidate> = candidates
            .into_iter()
            .filter(|candidate| {
                scorer::passes_gates(
                    &candidate.verification,
                    config.min_test_pass_rate,
                    config.require_all_tests_pass,
                )
            })
            .collect();

        if eligible.is_empty() {
            return Err(if config.require_all_tests_pass {
                AutoFixError::NoCandidatePassedAllTests
            } else {
                AutoFixError::NoVerifiedCandidates
            });
        }

        let ranked = scorer::rank(eligible);
        let best = ranked.into_iter().next().expect("checked non-empty above");

        if let Some(min_score) = config.min_score {
            if best.score < min_score {
                return Err(AutoFixError::BelowMinScore { top_score: best.score, min_score });
            }
        }

        let updated_entitlement = self.entitlements.record_usage(entitlement);
        Ok(GenerationOutcome { proposal: finalize_proposal(best, now), updated_entitlement })
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_one_candidate(
        &self,
        finding: &Finding,
        repo_path: &Path,
        rag_snippets: &[String],
        historical_feedback: Option<&str>,
        test_command: &[String],
        import_check_command: &[String],
        timeout: std::time::Duration,
        seed: u64,
        index: u32,
    ) -> Option<Candidate> {
        let request = build_request(finding, rag_snippets, GENERATION_TEMPERATURE, seed, historical_feedback);

        let raw = match self.llm.generate(request).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(candidate = index, error = %err, "candidate generation call failed");
                return None;
            }
        };

        let parsed = parse_model_output(&raw);
        if !parsed.parseable || parsed.changes.is_empty() {
            tracing::warn!(candidate = index, "candidate output was unparseable or proposed no changes");
            return None;
        }

        if !parsed.changes.iter().all(|change| syntax_check(&change.fixed_code)) {
            tracing::warn!(candidate = index, "candidate failed syntax check before sandboxing");
            return None;
        }

        let fix_id = format!("fix-{seed:016x}");
        let verification = self
            .sandbox
            .verify(&fix_id, repo_path, &parsed.changes, test_command, import_check_command, timeout)
            .await;

        let quality_score = scorer::quality_score(&parsed.description, &parsed.rationale);

        Some(Candidate {
            proposal: build_draft_proposal(fix_id, finding, &parsed, &verification),
            verification,
            quality_score,
        })
    }
}

fn build_draft_proposal(
    fix_id: String,
    finding: &Finding,
    parsed: &ParsedFix,
    verification: &alayasiki_core::code_model::VerificationResult,
) -> FixProposal {
    let confidence = if verification.test_pass_rate() >= 1.0 && verification.syntax_valid {
        Confidence::High
    } else if verification.test_pass_rate() >= 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    FixProposal {
        id: fix_id,
        finding: finding.clone(),
        fix_type: determine_fix_type(finding),
        confidence,
        changes: parsed.changes.clone(),
        title: parsed.title.clone(),
        description: parsed.description.clone(),
        rationale: parsed.rationale.clone(),
        evidence: parsed.evidence.clone(),
        syntax_valid: if verification.syntax_valid { SyntaxValidity::Valid } else { SyntaxValidity::Invalid },
        status: FixStatus::Pending,
        created_at: chrono::Utc::now(),
        applied_at: None,
        metadata: Default::default(),
    }
}

/// Classifies a finding into a `FixType` by severity and keyword matches in
/// its title/description, in priority order: security, then complexity,
/// then dead code, documentation, type hints, and long methods, falling
/// back to `Refactor`.
fn determine_fix_type(finding: &Finding) -> FixType {
    let title = finding.title.to_lowercase();
    let description = finding.description.to_lowercase();

    if finding.severity == Severity::Critical || title.contains("security") {
        return FixType::Security;
    }
    if title.contains("complex") || description.contains("cyclomatic") {
        return FixType::Simplify;
    }
    if title.contains("unused") || title.contains("dead code") {
        return FixType::Remove;
    }
    if title.contains("docstring") || title.contains("documentation") {
        return FixType::Documentation;
    }
    if title.contains("type") && description.contains("hint") {
        return FixType::TypeHint;
    }
    if title.contains("long") || title.contains("too many") {
        return FixType::Extract;
    }
    FixType::Refactor
}

fn finalize_proposal(scored: ScoredCandidate, _generated_at: chrono::DateTime<chrono::Utc>) -> FixProposal {
    let mut proposal = scored.candidate.proposal;
    proposal
        .metadata
        .insert("score".to_string(), format!("{:.4}", scored.score));
    proposal
}
