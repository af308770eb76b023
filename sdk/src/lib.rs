//! Public facade wiring the hybrid retriever, the best-of-N auto-fix
//! pipeline, and the adaptive learning loop behind the handful of calls an
//! embedding application needs: `retrieve`, `retrieve_by_path`, `ask`,
//! `generate_fix`, `record_decision`.

use std::path::Path;
use std::sync::Arc;

use alayasiki_core::code_model::{
    Entitlement, EdgeKind, Finding, FixDecision, FixType, NodeKind, RetrievalResult,
};
use alayasiki_core::config::AutoFixConfig;
use autofix::{AutoFixError, BestOfNGenerator, GenerationOutcome};
use learning::{AdaptiveConfidence, DecisionStore, LearningError};
use query::{Answer, HybridRetriever, HybridRetrieverError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Retrieval(#[from] HybridRetrieverError),
    #[error(transparent)]
    AutoFix(#[from] AutoFixError),
    #[error(transparent)]
    Learning(#[from] LearningError),
}

pub struct Repotoire {
    retriever: HybridRetriever,
    generator: BestOfNGenerator,
    decisions: Arc<DecisionStore>,
    autofix_config: AutoFixConfig,
}

impl Repotoire {
    pub fn new(
        retriever: HybridRetriever,
        generator: BestOfNGenerator,
        decisions: Arc<DecisionStore>,
        autofix_config: AutoFixConfig,
    ) -> Self {
        Self { retriever, generator, decisions, autofix_config }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        kinds: Option<Vec<NodeKind>>,
        include_related: bool,
    ) -> Result<Vec<RetrievalResult>, SdkError> {
        Ok(self.retriever.retrieve(query, top_k, kinds, include_related).await?)
    }

    pub async fn retrieve_by_path(
        &self,
        start_qname: &str,
        edge_kinds: &[EdgeKind],
        max_hops: u32,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>, SdkError> {
        Ok(self.retriever.retrieve_by_path(start_qname, edge_kinds, max_hops, limit).await?)
    }

    pub async fn ask(&self, query: &str, top_k: usize) -> Answer {
        self.retriever.ask(query, top_k).await
    }

    /// Generates a best-of-N fix. Retrieves the finding's affected files as
    /// grounding context, folds in any "Historical Feedback" prompt block
    /// `AdaptiveConfidence` has accrued for this fix's repository, then runs
    /// the generator. The entitlement accounting returned alongside the
    /// proposal is the caller's responsibility to persist — `Entitlements`
    /// itself holds no state (see `core::entitlements`).
    pub async fn generate_fix(
        &self,
        finding: &Finding,
        repo_path: &Path,
        repository: Option<&str>,
        entitlement: &Entitlement,
    ) -> Result<GenerationOutcome, SdkError> {
        let rag_snippets = self.gather_rag_snippets(finding).await;

        let adaptive = AdaptiveConfidence::new(&self.decisions);
        let historical_feedback = adaptive.prompt_adjustment(repository).await?;

        let outcome = self
            .generator
            .generate(
                finding,
                repo_path,
                &rag_snippets,
                historical_feedback.as_deref(),
                &self.autofix_config,
                entitlement,
            )
            .await?;

        Ok(outcome)
    }

    pub async fn record_decision(&self, decision: FixDecision) -> Result<(), SdkError> {
        Ok(self.decisions.record(decision).await?)
    }

    /// Whether a high-confidence fix of `fix_type` should still be routed
    /// to a human reviewer rather than auto-applied.
    pub async fn should_skip_auto_approve(
        &self,
        fix_type: FixType,
        repository: Option<&str>,
    ) -> Result<bool, SdkError> {
        let adaptive = AdaptiveConfidence::new(&self.decisions);
        Ok(adaptive.should_skip_auto_approve(fix_type, repository).await?)
    }

    async fn gather_rag_snippets(&self, finding: &Finding) -> Vec<String> {
        let mut snippets = Vec::new();
        for file in &finding.affected_files {
            match self.retriever.retrieve(file, 3, None, false).await {
                Ok(results) => snippets.extend(results.into_iter().map(|r| render_result_snippet(&r))),
                Err(err) => {
                    tracing::warn!(%file, %err, "failed to gather grounding context for finding");
                }
            }
        }
        snippets
    }
}

fn render_result_snippet(result: &RetrievalResult) -> String {
    format!("{}:\n{}", result.qualified_name, result.code)
}
