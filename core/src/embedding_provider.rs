//! Dense-vector embedding backends and process-wide backend selection.
//!
//! Backends are a sealed enum rather than a string-keyed registry: selection
//! is a `match`, and each variant carries its own static configuration
//! (model id, dimensions, credential env var) instead of living in a
//! dynamically indexed map.

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::embedding::deterministic_embedding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingBackendKind {
    Voyage,
    OpenAi,
    DeepInfra,
    Local,
}

struct BackendSpec {
    kind: EmbeddingBackendKind,
    model_id: &'static str,
    dimensions: usize,
    credential_env_var: Option<&'static str>,
    base_url: Option<&'static str>,
}

const BACKEND_SPECS: [BackendSpec; 4] = [
    BackendSpec {
        kind: EmbeddingBackendKind::Voyage,
        model_id: "voyage-code-3",
        dimensions: 1024,
        credential_env_var: Some("VOYAGE_API_KEY"),
        base_url: Some("https://api.voyageai.com/v1"),
    },
    BackendSpec {
        kind: EmbeddingBackendKind::OpenAi,
        model_id: "text-embedding-3-small",
        dimensions: 1536,
        credential_env_var: Some("OPENAI_API_KEY"),
        base_url: Some("https://api.openai.com/v1"),
    },
    BackendSpec {
        kind: EmbeddingBackendKind::DeepInfra,
        model_id: "Qwen/Qwen3-Embedding-8B",
        dimensions: 4096,
        credential_env_var: Some("DEEPINFRA_API_KEY"),
        base_url: Some("https://api.deepinfra.com/v1/openai"),
    },
    BackendSpec {
        kind: EmbeddingBackendKind::Local,
        model_id: "Qwen/Qwen3-Embedding-0.6B",
        dimensions: 1024,
        credential_env_var: None,
        base_url: None,
    },
];

/// Smaller local model dimensions used when the primary local model fails
/// to load (memory pressure, download failure).
const LOCAL_FALLBACK_MODEL_ID: &str = "all-MiniLM-L6-v2";
const LOCAL_FALLBACK_DIMENSIONS: usize = 384;

fn spec_for(kind: EmbeddingBackendKind) -> &'static BackendSpec {
    BACKEND_SPECS
        .iter()
        .find(|spec| spec.kind == kind)
        .expect("every EmbeddingBackendKind has a BackendSpec")
}

/// Selects a backend by priority order, preferring whichever credential is
/// present; `local` requires no credential and is the guaranteed fallback.
pub fn select_backend() -> (EmbeddingBackendKind, String) {
    for spec in &BACKEND_SPECS {
        if let Some(var) = spec.credential_env_var {
            if env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false) {
                let reason = format!("{} credential present ({var})", backend_name(spec.kind));
                return (spec.kind, reason);
            }
        }
    }
    (
        EmbeddingBackendKind::Local,
        "no provider credential configured; using the free local backend".to_string(),
    )
}

fn backend_name(kind: EmbeddingBackendKind) -> &'static str {
    match kind {
        EmbeddingBackendKind::Voyage => "voyage",
        EmbeddingBackendKind::OpenAi => "openai",
        EmbeddingBackendKind::DeepInfra => "deepinfra",
        EmbeddingBackendKind::Local => "local",
    }
}

static SELECTED_BACKEND: OnceLock<(EmbeddingBackendKind, String)> = OnceLock::new();

/// Process-wide cached backend selection; computed once, read concurrently
/// thereafter.
pub fn cached_backend_selection() -> &'static (EmbeddingBackendKind, String) {
    SELECTED_BACKEND.get_or_init(select_backend)
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding provider returned malformed response: {0}")]
    MalformedResponse(String),
    #[error("local embedding model unavailable: {0}")]
    LocalModelUnavailable(String),
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Local, dependency-free backend. Falls back to a 384-dim model on
/// construction failure and logs the downgrade; here "failure to load"
/// is modeled by an explicit constructor flag since no real model weights
/// are fetched in-process.
pub struct LocalEmbeddingProvider {
    model_id: String,
    dimensions: usize,
}

impl LocalEmbeddingProvider {
    pub fn new() -> Self {
        let spec = spec_for(EmbeddingBackendKind::Local);
        Self {
            model_id: spec.model_id.to_string(),
            dimensions: spec.dimensions,
        }
    }

    /// Construct the provider, simulating a primary-model load failure by
    /// downgrading to the smaller fallback model.
    pub fn new_with_load_result(primary_loaded: bool) -> Self {
        if primary_loaded {
            Self::new()
        } else {
            warn!(
                from = spec_for(EmbeddingBackendKind::Local).model_id,
                to = LOCAL_FALLBACK_MODEL_ID,
                "local embedding model failed to load; downgrading to fallback model"
            );
            Self {
                model_id: LOCAL_FALLBACK_MODEL_ID.to_string(),
                dimensions: LOCAL_FALLBACK_DIMENSIONS,
            }
        }
    }
}

impl Default for LocalEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(deterministic_embedding(text, &self.model_id, self.dimensions))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| deterministic_embedding(text, &self.model_id, self.dimensions))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStyleEmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStyleEmbeddingResponse {
    data: Vec<OpenAiStyleEmbeddingDatum>,
}

/// Shared HTTP-backed implementation for the OpenAI-compatible embeddings
/// endpoint shape, which `openai` and `deepinfra` both expose.
pub struct HttpEmbeddingProvider {
    kind: EmbeddingBackendKind,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(kind: EmbeddingBackendKind, api_key: impl Into<String>) -> Self {
        let spec = spec_for(kind);
        Self {
            kind,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with a static timeout"),
            base_url: spec
                .base_url
                .unwrap_or("https://api.voyageai.com/v1")
                .to_string(),
            api_key: api_key.into(),
            model_id: spec.model_id.to_string(),
            dimensions: spec.dimensions,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch.pop().ok_or_else(|| {
            EmbeddingError::MalformedResponse("empty embedding batch response".to_string())
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = match self.kind {
            EmbeddingBackendKind::Voyage => format!("{}/embeddings", self.base_url),
            _ => format!("{}/embeddings", self.base_url),
        };

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model_id,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|err| EmbeddingError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!("{status}: {body}")));
        }

        let parsed: OpenAiStyleEmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::MalformedResponse(err.to_string()))?;

        info!(backend = backend_name(self.kind), count = parsed.data.len(), "embedded batch");
        Ok(parsed.data.into_iter().map(|datum| datum.embedding).collect())
    }
}

/// Build the `EmbeddingProvider` selected by [`cached_backend_selection`].
pub fn build_provider_from_selection() -> Box<dyn EmbeddingProvider> {
    let (kind, reason) = cached_backend_selection();
    info!(backend = backend_name(*kind), reason = %reason, "selected embedding backend");

    match kind {
        EmbeddingBackendKind::Local => Box::new(LocalEmbeddingProvider::new()),
        other => {
            let spec = spec_for(*other);
            let credential_var = spec.credential_env_var.unwrap_or_default();
            let api_key = env::var(credential_var).unwrap_or_default();
            Box::new(HttpEmbeddingProvider::new(*other, api_key))
        }
    }
}
