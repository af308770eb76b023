pub mod cache;
pub mod dsl;
pub mod engine;
pub mod fusion;
pub mod graph_store;
pub mod graphrag;
pub mod hybrid;
pub mod lucene;
pub mod planner;
pub mod reranker;
pub mod semantic_cache;
pub mod snippet;

pub use dsl::{QueryMode, QueryRequest, SearchMode};
pub use engine::{QueryEngine, QueryError, QueryResponse};
pub use graph_store::{GraphStore, GraphStoreError, InMemoryGraphStore};
pub use hybrid::{Answer, HybridRetriever, HybridRetrieverError};
pub use planner::{QueryPlan, QueryPlanner};
pub use reranker::{LexicalOverlapReranker, RerankError, Reranker};
