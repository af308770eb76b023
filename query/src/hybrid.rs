//! `HybridRetriever`: orchestrates the cache → dense/sparse → fusion →
//! rerank → graph-expansion → snippet pipeline described in §4.4, and an
//! `ask` mode that layers LLM-backed answer synthesis on top of `retrieve`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use alayasiki_core::code_model::{CodeNode, EdgeKind, NodeKind, RetrievalResult};
use alayasiki_core::config::RetrievalConfig;
use alayasiki_core::embedding_provider::{EmbeddingError, EmbeddingProvider};
use alayasiki_core::llm::{ChatMessage, GenerateRequest, Llm};

use crate::cache::{RetrievalCache, RetrievalCacheKey};
use crate::fusion::{self, BranchMatch};
use crate::lucene;
use crate::graph_store::GraphStore;
use crate::reranker::{RerankCandidate, Reranker};
use crate::snippet::render_snippet;

const DEFAULT_ENTITY_KINDS: [NodeKind; 3] = [NodeKind::Function, NodeKind::Class, NodeKind::File];

#[derive(Debug, Error)]
pub enum HybridRetrieverError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
    pub confidence: f32,
    pub follow_ups: Vec<String>,
    pub elapsed_ms: u64,
}

pub struct HybridRetriever {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    graph_store: Arc<dyn GraphStore>,
    reranker: Option<Arc<dyn Reranker>>,
    llm: Option<Arc<dyn Llm>>,
    cache: Mutex<RetrievalCache>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        graph_store: Arc<dyn GraphStore>,
        config: RetrievalConfig,
    ) -> Self {
        let cache = RetrievalCache::new(config.cache_max_size, config.cache_ttl_secs);
        Self { embedding_provider, graph_store, reranker: None, llm: None, cache: Mutex::new(cache), config }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn invalidate_cache(&self) {
        self.cache.lock().await.invalidate();
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        entity_kinds: Option<Vec<NodeKind>>,
        include_related: bool,
    ) -> Result<Vec<RetrievalResult>, HybridRetrieverError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let kinds = entity_kinds.unwrap_or_else(|| DEFAULT_ENTITY_KINDS.to_vec());
        let cache_key = RetrievalCacheKey::new(query, top_k, &kinds);

        {
            let mut cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&cache_key) {
                return Ok(cached);
            }
        }

        let embedding = self.embedding_provider.embed_query(query).await?;
        let escaped_query = lucene::escape(query);

        let (dense_rows, sparse_rows) =
            tokio::join!(self.collect_dense(&kinds, &embedding), self.collect_sparse(&kinds, &escaped_query));

        let mut payloads: HashMap<String, CodeNode> = HashMap::new();
        let dense_branch = to_branch_matches(&dense_rows, &mut payloads);
        let sparse_branch = to_branch_matches(&sparse_rows, &mut payloads);

        let fused = fusion::fuse(
            &dense_branch,
            &sparse_branch,
            self.config.fusion_algorithm,
            self.config.rrf_k,
            self.config.linear_alpha,
        );

        let selected = if self.config.reranking_enabled && self.reranker.is_some() {
            self.rerank_stage(query, &fused, &payloads, top_k).await
        } else {
            fused
                .into_iter()
                .take(top_k)
                .map(|fused_match| (fused_match.qualified_name, fused_match.score, None))
                .collect::<Vec<_>>()
        };

        let mut results = Vec::with_capacity(selected.len());
        for (qualified_name, score, original_score) in selected {
            let Some(node) = payloads.get(&qualified_name) else { continue };
            results.push(self.render_result(node, score, original_score, include_related).await);
        }

        let mut cache = self.cache.lock().await;
        cache.put(cache_key, results.clone());
        info!(query_len = query.len(), count = results.len(), "retrieve completed");
        Ok(results)
    }

    async fn collect_dense(&self, kinds: &[NodeKind], embedding: &[f32]) -> Vec<(CodeNode, f32)> {
        let mut all = Vec::new();
        for &kind in kinds {
            match self.graph_store.vector_search(kind, embedding, self.config.dense_top_k).await {
                Ok(rows) => all.extend(rows),
                Err(err) => warn!(%err, ?kind, "dense branch failed; continuing with partial results"),
            }
        }
        all
    }

    async fn collect_sparse(&self, kinds: &[NodeKind], escaped_query: &str) -> Vec<(CodeNode, f32)> {
        let mut all = Vec::new();
        for &kind in kinds {
            match self.graph_store.bm25_search(kind, escaped_query, self.config.bm25_top_k).await {
                Ok(rows) => all.extend(rows),
                Err(err) => warn!(%err, ?kind, "sparse branch failed; continuing with partial results"),
            }
        }
        all
    }

    async fn rerank_stage(
        &self,
        query: &str,
        fused: &[fusion::FusedMatch],
        payloads: &HashMap<String, CodeNode>,
        top_k: usize,
    ) -> Vec<(String, f32, Option<f32>)> {
        let pool_size = self.config.rerank_top_k * self.config.retrieve_multiplier;
        let pool: Vec<&fusion::FusedMatch> = fused.iter().take(pool_size).collect();

        let candidates: Vec<RerankCandidate> = pool
            .iter()
            .filter_map(|fused_match| {
                let node = payloads.get(&fused_match.qualified_name)?;
                Some(RerankCandidate {
                    qualified_name: fused_match.qualified_name.clone(),
                    rendered_text: rendered_text_for_rerank(node),
                    original_score: fused_match.score,
                })
            })
            .collect();

        let reranker = self.reranker.as_ref().expect("checked by caller");
        match reranker.rerank(query, &candidates, self.config.rerank_top_k).await {
            Ok(reranked) => crate::reranker::truncate_to_top_k(reranked, top_k)
                .into_iter()
                .map(|m| (m.qualified_name, m.score, Some(m.original_score)))
                .collect(),
            Err(err) => {
                warn!(%err, "reranker failed; falling back to fused order");
                fused
                    .iter()
                    .take(top_k)
                    .map(|m| (m.qualified_name.clone(), m.score, None))
                    .collect()
            }
        }
    }

    async fn render_result(
        &self,
        node: &CodeNode,
        score: f32,
        original_score: Option<f32>,
        include_related: bool,
    ) -> RetrievalResult {
        let code = render_snippet(&node.file_path, node.line_start, node.line_end, self.config.context_lines);

        let relationships = if include_related {
            match self.graph_store.one_hop_relationships(&node.qualified_name, self.config.max_relationships).await {
                Ok(relationships) => relationships,
                Err(err) => {
                    warn!(%err, qualified_name = %node.qualified_name, "relationship expansion failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut metadata = HashMap::new();
        if let Some(original) = original_score {
            metadata.insert("original_score".to_string(), original.to_string());
        }

        RetrievalResult {
            kind: node.kind,
            qualified_name: node.qualified_name.clone(),
            name: node.name.clone(),
            code,
            score,
            relationships,
            metadata,
        }
        .clamp_score()
    }

    pub async fn retrieve_by_path(
        &self,
        start_qname: &str,
        edge_kinds: &[EdgeKind],
        max_hops: u32,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>, HybridRetrieverError> {
        let reachable = match self.graph_store.reachable_within_hops(start_qname, edge_kinds, max_hops).await {
            Ok(reachable) => reachable,
            Err(err) => {
                warn!(%err, start_qname, "path traversal failed");
                Vec::new()
            }
        };

        let mut scored: Vec<(CodeNode, f32)> =
            reachable.into_iter().map(|(node, distance)| (node, 1.0 / (distance as f32 + 1.0))).collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.qualified_name.cmp(&b.0.qualified_name))
        });
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (node, score) in &scored {
            results.push(self.render_result(node, *score, None, true).await);
        }
        Ok(results)
    }

    pub async fn ask(&self, query: &str, top_k: usize) -> Answer {
        let started = Instant::now();
        let sources = self.retrieve(query, top_k, None, true).await.unwrap_or_default();

        if sources.is_empty() {
            return Answer {
                answer: "No matching code was found for this question.".to_string(),
                sources,
                confidence: 0.0,
                follow_ups: Vec::new(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        let confidence = mean_top_n_score(&sources, 3);
        let follow_ups = heuristic_follow_ups(&sources[0]);

        let Some(llm) = &self.llm else {
            return Answer {
                answer: degrade_to_listing(&sources),
                sources,
                confidence: 0.3,
                follow_ups,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        };

        let context = format_evidence_block(&sources);
        let request = GenerateRequest::new(vec![ChatMessage::user(format!(
            "Question: {query}\n\nEvidence:\n{context}"
        ))])
        .with_system("You are an expert code historian. Answer concisely using only the evidence provided.")
        .with_temperature(0.2);

        match llm.generate(request).await {
            Ok(answer) => Answer { answer, sources, confidence, follow_ups, elapsed_ms: started.elapsed().as_millis() as u64 },
            Err(err) => {
                warn!(%err, "ask's llm call failed; degrading to a listing of top results");
                Answer {
                    answer: degrade_to_listing(&sources),
                    sources,
                    confidence: 0.3,
                    follow_ups,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

fn to_branch_matches(rows: &[(CodeNode, f32)], payloads: &mut HashMap<String, CodeNode>) -> Vec<BranchMatch> {
    rows.iter()
        .map(|(node, score)| {
            payloads.entry(node.qualified_name.clone()).or_insert_with(|| node.clone());
            BranchMatch { qualified_name: node.qualified_name.clone(), score: *score }
        })
        .collect()
}

fn rendered_text_for_rerank(node: &CodeNode) -> String {
    let docstring = node.docstring.as_deref().unwrap_or_default();
    let source = std::fs::read_to_string(&node.file_path).unwrap_or_default();
    let truncated_source: String = source.chars().take(500).collect();
    format!("{} {} {}", node.name, docstring, truncated_source)
}

fn mean_top_n_score(sources: &[RetrievalResult], n: usize) -> f32 {
    let count = sources.len().min(n);
    if count == 0 {
        return 0.0;
    }
    sources.iter().take(count).map(|r| r.score).sum::<f32>() / count as f32
}

fn heuristic_follow_ups(top: &RetrievalResult) -> Vec<String> {
    vec![
        format!("What else does {} call or use?", top.qualified_name),
        format!("What other entities live in {}?", top.file_path_hint()),
        format!("What changed in {} recently?", top.file_path_hint()),
    ]
}

trait FilePathHint {
    fn file_path_hint(&self) -> String;
}

impl FilePathHint for RetrievalResult {
    fn file_path_hint(&self) -> String {
        self.qualified_name.split("::").next().unwrap_or(&self.qualified_name).to_string()
    }
}

fn format_evidence_block(sources: &[RetrievalResult]) -> String {
    sources
        .iter()
        .take(10)
        .enumerate()
        .map(|(i, result)| {
            format!(
                "{}. {:?} {} (score {:.2})\n   {}\n",
                i + 1,
                result.kind,
                result.qualified_name,
                result.score,
                result.code.lines().take(3).collect::<Vec<_>>().join("\n   ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn degrade_to_listing(sources: &[RetrievalResult]) -> String {
    let listing = sources
        .iter()
        .take(5)
        .map(|result| format!("- {} ({})", result.qualified_name, result.file_path_hint()))
        .collect::<Vec<_>>()
        .join("\n");
    format!("The answer service is unavailable; here are the top matching entities:\n{listing}")
}
