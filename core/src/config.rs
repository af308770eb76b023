use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
    pub wal_flush_interval_ms: u64,
}

/// Fusion algorithm selectable by `RetrievalConfig`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FusionAlgorithm {
    ReciprocalRankFusion,
    NormalizedLinear,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "RetrievalConfig::default_fusion_algorithm")]
    pub fusion_algorithm: FusionAlgorithm,
    #[serde(default = "RetrievalConfig::default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "RetrievalConfig::default_linear_alpha")]
    pub linear_alpha: f32,
    #[serde(default = "RetrievalConfig::default_dense_top_k")]
    pub dense_top_k: usize,
    #[serde(default = "RetrievalConfig::default_bm25_top_k")]
    pub bm25_top_k: usize,
    #[serde(default = "RetrievalConfig::default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "RetrievalConfig::default_retrieve_multiplier")]
    pub retrieve_multiplier: usize,
    #[serde(default)]
    pub reranking_enabled: bool,
    #[serde(default = "RetrievalConfig::default_max_relationships")]
    pub max_relationships: usize,
    #[serde(default = "RetrievalConfig::default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "RetrievalConfig::default_cache_max_size")]
    pub cache_max_size: usize,
    #[serde(default = "RetrievalConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl RetrievalConfig {
    fn default_fusion_algorithm() -> FusionAlgorithm {
        FusionAlgorithm::ReciprocalRankFusion
    }
    fn default_rrf_k() -> u32 {
        60
    }
    fn default_linear_alpha() -> f32 {
        0.7
    }
    fn default_dense_top_k() -> usize {
        100
    }
    fn default_bm25_top_k() -> usize {
        100
    }
    fn default_rerank_top_k() -> usize {
        10
    }
    fn default_retrieve_multiplier() -> usize {
        3
    }
    fn default_max_relationships() -> usize {
        20
    }
    fn default_context_lines() -> usize {
        5
    }
    fn default_cache_max_size() -> usize {
        1000
    }
    fn default_cache_ttl_secs() -> u64 {
        3600
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fusion_algorithm: Self::default_fusion_algorithm(),
            rrf_k: Self::default_rrf_k(),
            linear_alpha: Self::default_linear_alpha(),
            dense_top_k: Self::default_dense_top_k(),
            bm25_top_k: Self::default_bm25_top_k(),
            rerank_top_k: Self::default_rerank_top_k(),
            retrieve_multiplier: Self::default_retrieve_multiplier(),
            reranking_enabled: false,
            max_relationships: Self::default_max_relationships(),
            context_lines: Self::default_context_lines(),
            cache_max_size: Self::default_cache_max_size(),
            cache_ttl_secs: Self::default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AutoFixConfig {
    #[serde(default = "AutoFixConfig::default_n")]
    pub n: u32,
    #[serde(default = "AutoFixConfig::default_max_concurrent_sandboxes")]
    pub max_concurrent_sandboxes: usize,
    #[serde(default = "AutoFixConfig::default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "AutoFixConfig::default_min_test_pass_rate")]
    pub min_test_pass_rate: f32,
    #[serde(default)]
    pub require_all_tests_pass: bool,
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default = "AutoFixConfig::default_test_command")]
    pub test_command: Vec<String>,
    #[serde(default = "AutoFixConfig::default_import_check_command")]
    pub import_check_command: Vec<String>,
}

impl AutoFixConfig {
    fn default_n() -> u32 {
        3
    }
    fn default_max_concurrent_sandboxes() -> usize {
        5
    }
    fn default_test_timeout_secs() -> u64 {
        120
    }
    fn default_min_test_pass_rate() -> f32 {
        0.0
    }
    fn default_test_command() -> Vec<String> {
        vec!["pytest".to_string(), "-q".to_string()]
    }
    fn default_import_check_command() -> Vec<String> {
        vec!["python3".to_string(), "-m".to_string(), "py_compile".to_string()]
    }
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            n: Self::default_n(),
            max_concurrent_sandboxes: Self::default_max_concurrent_sandboxes(),
            test_timeout_secs: Self::default_test_timeout_secs(),
            min_test_pass_rate: Self::default_min_test_pass_rate(),
            require_all_tests_pass: false,
            min_score: None,
            test_command: Self::default_test_command(),
            import_check_command: Self::default_import_check_command(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecisionStoreConfig {
    #[serde(default = "DecisionStoreConfig::default_path")]
    pub jsonl_path: String,
}

impl DecisionStoreConfig {
    fn default_path() -> String {
        "~/.repotoire/decisions.jsonl".to_string()
    }
}

impl Default for DecisionStoreConfig {
    fn default() -> Self {
        Self { jsonl_path: Self::default_path() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub autofix: AutoFixConfig,
    #[serde(default)]
    pub decision_store: DecisionStoreConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("ALAYASIKI"))
            .add_source(Environment::with_prefix("REPOTOIRE").separator("__"));

        builder.build()?.try_deserialize()
    }
}
