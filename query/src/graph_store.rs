//! `GraphStore`-shaped trait boundary plus an in-process reference
//! implementation over `CodeNode`/`Edge`/`Commit`.
//!
//! The portable "GraphStore executes parameterized queries against whichever
//! graph database backs it" contract (§4.1) is expressed here as a small
//! trait with vector-search, BM25-search and one-hop/`max_hops` expansion
//! operations, rather than a single `execute_query(statement, params)`
//! entry point — a real Neo4j/FalkorDB adapter implements the same trait by
//! translating each operation into its own dialect, instead of string-
//! building Cypher inline in the retriever.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use storage::Bm25Index;
use thiserror::Error;

use alayasiki_core::code_model::{CodeNode, EdgeKind, NodeKind, Relationship};

#[derive(Debug, Error)]
pub enum GraphStoreError {
    #[error("graph store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_node(&self, qualified_name: &str) -> Result<Option<CodeNode>, GraphStoreError>;

    /// Cosine-similarity search over nodes of `kind`, highest score first.
    async fn vector_search(
        &self,
        kind: NodeKind,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(CodeNode, f32)>, GraphStoreError>;

    /// BM25 search over nodes of `kind` against `escaped_query`.
    async fn bm25_search(
        &self,
        kind: NodeKind,
        escaped_query: &str,
        top_k: usize,
    ) -> Result<Vec<(CodeNode, f32)>, GraphStoreError>;

    /// One-hop neighbors reachable via any relationship edge kind.
    async fn one_hop_relationships(
        &self,
        qualified_name: &str,
        max_relationships: usize,
    ) -> Result<Vec<Relationship>, GraphStoreError>;

    /// All distinct nodes reachable from `start_qname` via `edge_kinds`
    /// within `1..=max_hops` hops, with their BFS distance.
    async fn reachable_within_hops(
        &self,
        start_qname: &str,
        edge_kinds: &[EdgeKind],
        max_hops: u32,
    ) -> Result<Vec<(CodeNode, u32)>, GraphStoreError>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a * norm_b))
}

/// In-process `GraphStore` reference implementation. Nodes and edges live
/// in-memory; durability is out of scope here (the `storage` crate's
/// `Repository` provides WAL/snapshot durability for the generic `Node`/
/// `Edge` model it owns — this store is the CodeNode-shaped facade the
/// retriever actually talks to).
pub struct InMemoryGraphStore {
    nodes: HashMap<String, CodeNode>,
    edges: Vec<alayasiki_core::code_model::Edge>,
    text_index: Bm25Index,
    text_index_ids: HashMap<String, u64>,
    text_index_qnames: HashMap<u64, String>,
    next_text_index_id: u64,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            text_index: Bm25Index::new(),
            text_index_ids: HashMap::new(),
            text_index_qnames: HashMap::new(),
            next_text_index_id: 0,
        }
    }

    pub fn insert_node(&mut self, node: CodeNode) {
        let searchable_text = format!(
            "{} {}",
            node.name,
            node.docstring.as_deref().unwrap_or_default()
        );
        let id = match self.text_index_ids.get(&node.qualified_name) {
            Some(&id) => id,
            None => {
                let id = self.next_text_index_id;
                self.next_text_index_id += 1;
                self.text_index_ids.insert(node.qualified_name.clone(), id);
                id
            }
        };
        self.text_index_qnames.insert(id, node.qualified_name.clone());
        self.text_index.insert(id, &searchable_text);
        self.nodes.insert(node.qualified_name.clone(), node);
    }

    pub fn insert_edge(&mut self, edge: alayasiki_core::code_model::Edge) {
        self.edges.push(edge);
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn get_node(&self, qualified_name: &str) -> Result<Option<CodeNode>, GraphStoreError> {
        Ok(self.nodes.get(qualified_name).cloned())
    }

    async fn vector_search(
        &self,
        kind: NodeKind,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(CodeNode, f32)>, GraphStoreError> {
        let mut scored: Vec<(CodeNode, f32)> = self
            .nodes
            .values()
            .filter(|node| node.kind == kind)
            .filter_map(|node| {
                let node_embedding = node.embedding.as_deref()?;
                let score = cosine_similarity(embedding, node_embedding)?;
                Some((node.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.qualified_name.cmp(&b.0.qualified_name))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn bm25_search(
        &self,
        kind: NodeKind,
        escaped_query: &str,
        top_k: usize,
    ) -> Result<Vec<(CodeNode, f32)>, GraphStoreError> {
        let ranked = self.text_index.search(escaped_query, self.nodes.len().max(top_k));
        let mut results: Vec<(CodeNode, f32)> = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                let qname = self.text_index_qnames.get(&id)?;
                let node = self.nodes.get(qname)?;
                (node.kind == kind).then(|| (node.clone(), score))
            })
            .collect();
        results.truncate(top_k);
        Ok(results)
    }

    async fn one_hop_relationships(
        &self,
        qualified_name: &str,
        max_relationships: usize,
    ) -> Result<Vec<Relationship>, GraphStoreError> {
        let relationships = self
            .edges
            .iter()
            .filter(|edge| edge.source == qualified_name && edge.kind != EdgeKind::Modified)
            .take(max_relationships)
            .map(|edge| Relationship { qualified_name: edge.target.clone(), edge_kind: edge.kind })
            .collect();
        Ok(relationships)
    }

    async fn reachable_within_hops(
        &self,
        start_qname: &str,
        edge_kinds: &[EdgeKind],
        max_hops: u32,
    ) -> Result<Vec<(CodeNode, u32)>, GraphStoreError> {
        if max_hops == 0 {
            return Ok(Vec::new());
        }

        let mut visited: HashMap<String, u32> = HashMap::new();
        visited.insert(start_qname.to_string(), 0);
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((start_qname.to_string(), 0));
        let mut ordered_targets: Vec<(String, u32)> = Vec::new();

        while let Some((current, distance)) = queue.pop_front() {
            if distance >= max_hops {
                continue;
            }
            for edge in &self.edges {
                if edge.source != current || !edge_kinds.contains(&edge.kind) {
                    continue;
                }
                if visited.contains_key(&edge.target) {
                    continue;
                }
                let next_distance = distance + 1;
                visited.insert(edge.target.clone(), next_distance);
                ordered_targets.push((edge.target.clone(), next_distance));
                queue.push_back((edge.target.clone(), next_distance));
            }
        }

        let mut results = Vec::with_capacity(ordered_targets.len());
        for (qname, distance) in ordered_targets {
            if let Some(node) = self.nodes.get(&qname) {
                results.push((node.clone(), distance));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alayasiki_core::code_model::Edge;

    fn node(qname: &str, kind: NodeKind, embedding: Option<Vec<f32>>) -> CodeNode {
        CodeNode {
            qualified_name: qname.to_string(),
            name: qname.to_string(),
            kind,
            file_path: "a.py".to_string(),
            line_start: 1,
            line_end: 5,
            docstring: None,
            embedding,
            tenant_id: "acme".to_string(),
        }
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine_similarity() {
        let mut store = InMemoryGraphStore::new();
        store.insert_node(node("a", NodeKind::Function, Some(vec![1.0, 0.0])));
        store.insert_node(node("b", NodeKind::Function, Some(vec![0.0, 1.0])));

        let results = store.vector_search(NodeKind::Function, &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results[0].0.qualified_name, "a");
    }

    #[tokio::test]
    async fn bm25_search_filters_by_kind() {
        let mut store = InMemoryGraphStore::new();
        let mut func = node("auth.py::authenticate", NodeKind::Function, None);
        func.docstring = Some("authenticate the user".to_string());
        store.insert_node(func);
        let mut file = node("auth.py", NodeKind::File, None);
        file.docstring = Some("authenticate".to_string());
        store.insert_node(file);

        let results = store.bm25_search(NodeKind::Function, "authenticate", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.qualified_name, "auth.py::authenticate");
    }

    #[tokio::test]
    async fn one_hop_relationships_excludes_modified_edges() {
        let mut store = InMemoryGraphStore::new();
        store.insert_node(node("a", NodeKind::Function, None));
        store.insert_node(node("b", NodeKind::Function, None));
        store.insert_edge(Edge { source: "a".into(), target: "b".into(), kind: EdgeKind::Calls, committed_at: None });

        let relationships = store.one_hop_relationships("a", 20).await.unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].qualified_name, "b");
    }

    #[tokio::test]
    async fn reachable_within_hops_returns_empty_for_leaf_node() {
        let mut store = InMemoryGraphStore::new();
        store.insert_node(node("a", NodeKind::Function, None));

        let reachable = store
            .reachable_within_hops("a", &EdgeKind::RELATIONSHIP_KINDS, 3)
            .await
            .unwrap();
        assert!(reachable.is_empty());
    }

    #[tokio::test]
    async fn reachable_within_hops_respects_distance_ordering() {
        let mut store = InMemoryGraphStore::new();
        for qname in ["a", "b", "c"] {
            store.insert_node(node(qname, NodeKind::Function, None));
        }
        store.insert_edge(Edge { source: "a".into(), target: "b".into(), kind: EdgeKind::Calls, committed_at: None });
        store.insert_edge(Edge { source: "b".into(), target: "c".into(), kind: EdgeKind::Calls, committed_at: None });

        let reachable = store
            .reachable_within_hops("a", &EdgeKind::RELATIONSHIP_KINDS, 2)
            .await
            .unwrap();
        assert_eq!(reachable.len(), 2);
        assert_eq!(reachable.iter().find(|(n, _)| n.qualified_name == "c").unwrap().1, 2);
    }
}
