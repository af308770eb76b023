//! LRU+TTL cache over `retrieve` results, keyed by normalized query, top_k
//! and the sorted set of requested entity kinds. Distinct from
//! [`crate::semantic_cache::SemanticCache`], which fuzzy-matches whole
//! `ask` answers by query similarity; this cache does exact key matching
//! for the plain retrieval path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use alayasiki_core::code_model::{NodeKind, RetrievalResult};

fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalCacheKey {
    normalized_query: String,
    top_k: usize,
    entity_kinds: Vec<NodeKind>,
}

impl RetrievalCacheKey {
    pub fn new(query: &str, top_k: usize, entity_kinds: &[NodeKind]) -> Self {
        let mut sorted_kinds = entity_kinds.to_vec();
        sorted_kinds.sort_by_key(|kind| kind_order(*kind));
        Self { normalized_query: normalize_query(query), top_k, entity_kinds: sorted_kinds }
    }
}

fn kind_order(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Function => 0,
        NodeKind::Class => 1,
        NodeKind::File => 2,
    }
}

struct Entry {
    results: Vec<RetrievalResult>,
    created_at: Instant,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

/// LRU-evicted, TTL-expiring cache of `retrieve` result lists. Cloned on
/// both insert and lookup so callers can never mutate the cached copy.
pub struct RetrievalCache {
    entries: HashMap<RetrievalCacheKey, Entry>,
    max_size: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl RetrievalCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_size,
            ttl: Duration::from_secs(ttl_secs),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &RetrievalCacheKey) -> Option<Vec<RetrievalResult>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.created_at.elapsed() > self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };

        if expired {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }

        let results = {
            let entry = self.entries.get_mut(key).expect("checked above");
            entry.last_used = Instant::now();
            entry.results.clone()
        };
        self.hits += 1;
        Some(results)
    }

    pub fn put(&mut self, key: RetrievalCacheKey, results: Vec<RetrievalResult>) {
        let now = Instant::now();
        self.entries.insert(key, Entry { results, created_at: now, last_used: now });
        self.evict_to_capacity();
    }

    fn evict_to_capacity(&mut self) {
        while self.entries.len() > self.max_size {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    /// Remove all entries past their TTL, returning the count removed.
    pub fn invalidate_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { size: self.entries.len(), hits: self.hits, misses: self.misses }
    }
}
