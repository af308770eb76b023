//! Result-list fusion: combine a dense-vector ranking and a sparse BM25
//! ranking into one ordered list, by reciprocal rank or by normalized score.

use std::collections::HashMap;

use alayasiki_core::config::FusionAlgorithm;

/// One list entry feeding a fusion pass: a qualified name plus its score in
/// that branch's native scale (cosine similarity for dense, BM25 for sparse).
#[derive(Debug, Clone, PartialEq)]
pub struct BranchMatch {
    pub qualified_name: String,
    pub score: f32,
}

/// A qualified name's fused rank position plus the combined score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedMatch {
    pub qualified_name: String,
    pub score: f32,
}

/// Combine `dense` and `sparse` branch results per `algorithm`, returning a
/// single list sorted descending by fused score. Ties break on
/// `qualified_name` so fusion is deterministic given the same inputs.
pub fn fuse(
    dense: &[BranchMatch],
    sparse: &[BranchMatch],
    algorithm: FusionAlgorithm,
    rrf_k: u32,
    linear_alpha: f32,
) -> Vec<FusedMatch> {
    match algorithm {
        FusionAlgorithm::ReciprocalRankFusion => reciprocal_rank_fusion(dense, sparse, rrf_k),
        FusionAlgorithm::NormalizedLinear => normalized_linear_fusion(dense, sparse, linear_alpha),
    }
}

/// Reciprocal Rank Fusion: `score(id) = 1/(k + rank_dense) + 1/(k +
/// rank_sparse)`, omitting the term for a branch the id does not appear in.
/// Ranks are 1-indexed positions within each branch's own descending order.
/// An id present in both branches therefore always scores strictly higher
/// than if either branch's term were dropped — the "overlap bonus".
pub fn reciprocal_rank_fusion(dense: &[BranchMatch], sparse: &[BranchMatch], k: u32) -> Vec<FusedMatch> {
    let dense_ranks = ranks_by_qualified_name(dense);
    let sparse_ranks = ranks_by_qualified_name(sparse);

    let mut scores: HashMap<String, f32> = HashMap::new();
    for qname in dense_ranks.keys().chain(sparse_ranks.keys()) {
        let mut score = 0.0_f32;
        if let Some(rank) = dense_ranks.get(qname) {
            score += 1.0 / (k as f32 + *rank as f32);
        }
        if let Some(rank) = sparse_ranks.get(qname) {
            score += 1.0 / (k as f32 + *rank as f32);
        }
        scores.insert(qname.clone(), score);
    }

    sorted_fused(scores)
}

/// Min-max normalize each branch's raw scores to `[0,1]`, then combine as
/// `alpha * dense_norm + (1 - alpha) * sparse_norm`. An id absent from a
/// branch contributes 0 for that branch's term.
pub fn normalized_linear_fusion(dense: &[BranchMatch], sparse: &[BranchMatch], alpha: f32) -> Vec<FusedMatch> {
    let dense_norm = min_max_normalize(dense);
    let sparse_norm = min_max_normalize(sparse);

    let mut scores: HashMap<String, f32> = HashMap::new();
    for qname in dense_norm.keys().chain(sparse_norm.keys()) {
        let dense_term = dense_norm.get(qname).copied().unwrap_or(0.0);
        let sparse_term = sparse_norm.get(qname).copied().unwrap_or(0.0);
        scores.insert(qname.clone(), alpha * dense_term + (1.0 - alpha) * sparse_term);
    }

    sorted_fused(scores)
}

fn ranks_by_qualified_name(matches: &[BranchMatch]) -> HashMap<String, u32> {
    let mut ordered: Vec<&BranchMatch> = matches.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.qualified_name.cmp(&b.qualified_name))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, entry)| (entry.qualified_name.clone(), (index + 1) as u32))
        .collect()
}

fn min_max_normalize(matches: &[BranchMatch]) -> HashMap<String, f32> {
    if matches.is_empty() {
        return HashMap::new();
    }
    let min = matches.iter().map(|m| m.score).fold(f32::INFINITY, f32::min);
    let max = matches.iter().map(|m| m.score).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    matches
        .iter()
        .map(|m| {
            let normalized = if range.abs() < f32::EPSILON { 1.0 } else { (m.score - min) / range };
            (m.qualified_name.clone(), normalized)
        })
        .collect()
}

fn sorted_fused(scores: HashMap<String, f32>) -> Vec<FusedMatch> {
    let mut fused: Vec<FusedMatch> = scores
        .into_iter()
        .map(|(qualified_name, score)| FusedMatch { qualified_name, score })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.qualified_name.cmp(&b.qualified_name))
    });
    fused
}
