//! Sparse full-text index scoring documents by Okapi BM25.
//!
//! Mirrors the placeholder-linear-scan style of `index::ann::LinearAnnIndex`:
//! no external search engine, just an in-memory postings list good enough to
//! stand in for a real inverted index behind the same query surface.

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

#[derive(Debug, Clone, Default)]
struct Posting {
    term_frequencies: HashMap<u64, u32>,
}

/// In-memory BM25 index over documents keyed by node id.
pub struct Bm25Index {
    postings: HashMap<String, Posting>,
    doc_lengths: HashMap<u64, usize>,
    total_doc_length: u64,
    doc_count: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            postings: HashMap::new(),
            doc_lengths: HashMap::new(),
            total_doc_length: 0,
            doc_count: 0,
        }
    }

    /// Index (or re-index) a document's text under `id`.
    pub fn insert(&mut self, id: u64, text: &str) {
        self.delete(id);

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }

        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.clone()).or_insert(0) += 1;
        }

        for (term, count) in term_counts {
            self.postings
                .entry(term)
                .or_default()
                .term_frequencies
                .insert(id, count);
        }

        self.doc_lengths.insert(id, tokens.len());
        self.total_doc_length += tokens.len() as u64;
        self.doc_count += 1;
    }

    pub fn delete(&mut self, id: u64) -> bool {
        let Some(length) = self.doc_lengths.remove(&id) else {
            return false;
        };
        self.total_doc_length = self.total_doc_length.saturating_sub(length as u64);
        self.doc_count = self.doc_count.saturating_sub(1);
        for posting in self.postings.values_mut() {
            posting.term_frequencies.remove(&id);
        }
        true
    }

    fn avg_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            return 0.0;
        }
        self.total_doc_length as f32 / self.doc_count as f32
    }

    /// Score and rank documents against `query` using BM25, returning the
    /// top `k` `(id, score)` pairs sorted descending by score.
    pub fn search(&self, query: &str, k: usize) -> Vec<(u64, f32)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.doc_count == 0 {
            return Vec::new();
        }

        let avg_len = self.avg_doc_length();
        let mut scores: HashMap<u64, f32> = HashMap::new();

        let mut seen_terms: std::collections::HashSet<String> = std::collections::HashSet::new();
        for term in &query_terms {
            if !seen_terms.insert(term.clone()) {
                continue;
            }
            let Some(posting) = self.postings.get(term) else {
                continue;
            };

            let doc_freq = posting.term_frequencies.len() as f32;
            let idf = ((self.doc_count as f32 - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln();

            for (&doc_id, &tf) in &posting.term_frequencies {
                let doc_len = *self.doc_lengths.get(&doc_id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * (doc_len / avg_len.max(1.0)));
                let term_score = idf * (tf * (K1 + 1.0)) / denom.max(f32::EPSILON);
                *scores.entry(doc_id).or_insert(0.0) += term_score;
            }
        }

        let mut ranked: Vec<(u64, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut buf = String::new();

    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_alphanumeric() || ch == '_' {
            buf.push(ch);
        } else if !buf.is_empty() {
            tokens.push(std::mem::take(&mut buf));
        }
    }
    if !buf.is_empty() {
        tokens.push(buf);
    }

    tokens
}
