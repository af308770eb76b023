//! Optional cross-encoder-style re-scoring of fused candidates.

use async_trait::async_trait;
use thiserror::Error;

/// One candidate submitted for reranking: the rendered text a cross-encoder
/// would score jointly against the query, plus the fused score to preserve
/// as `original_score` if the caller wants it back.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidate {
    pub qualified_name: String,
    pub rendered_text: String,
    pub original_score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankedMatch {
    pub qualified_name: String,
    pub score: f32,
    pub original_score: f32,
}

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("reranker request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `(query, rendered_text)` pairs and return at most `top_k`
    /// matches sorted descending by rerank score. Implementations are
    /// trusted to sort but callers must still enforce the `top_k` cap
    /// themselves — see `truncate_to_top_k`.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
    ) -> Result<Vec<RerankedMatch>, RerankError>;
}

/// Truncates output to `top_k`, enforcing the reranker contract without
/// trusting the implementation to honor it (per the decided redesign note:
/// the retriever, not the reranker, is responsible for the cap).
pub fn truncate_to_top_k(mut matches: Vec<RerankedMatch>, top_k: usize) -> Vec<RerankedMatch> {
    matches.truncate(top_k);
    matches
}

/// Lexical-overlap cross-encoder stand-in: scores each candidate by the
/// Jaccard similarity of its tokenized rendered text against the tokenized
/// query. No network call, no model weights — a working reference
/// implementation the real cross-encoder backend would replace.
#[derive(Debug, Default)]
pub struct LexicalOverlapReranker;

impl LexicalOverlapReranker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reranker for LexicalOverlapReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
    ) -> Result<Vec<RerankedMatch>, RerankError> {
        let query_tokens = tokenize(query);

        let mut scored: Vec<RerankedMatch> = candidates
            .iter()
            .map(|candidate| {
                let doc_tokens = tokenize(&candidate.rendered_text);
                let score = jaccard(&query_tokens, &doc_tokens);
                RerankedMatch {
                    qualified_name: candidate.qualified_name.clone(),
                    score,
                    original_score: candidate.original_score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.qualified_name.cmp(&b.qualified_name))
        });

        Ok(truncate_to_top_k(scored, top_k))
    }
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

fn jaccard(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}
