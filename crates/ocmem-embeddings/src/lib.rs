//! # ocmem-embeddings
//!
//! Provider-agnostic embedding capability: a fixed dimension and two
//! operations (embed one text, embed a batch). Providers are
//! interchangeable; vectors handed to the store are always L2-normalized
//! so cosine thresholds keep their meaning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ocmem_config::EmbeddingConfig;
use ocmem_core::{MemoryError, Result};

#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text.
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vecs.pop()
            .ok_or_else(|| MemoryError::EmbeddingUnavailable("no embedding returned".into()))
    }

    /// The dimensionality of the output embeddings.
    fn dimension(&self) -> usize;

    /// Provider name.
    fn name(&self) -> &str;
}

/// Default (model, dimension) per provider.
fn provider_defaults(provider: &str) -> (&'static str, usize) {
    match provider {
        "openai" => ("text-embedding-3-small", 1536),
        "ollama" => ("nomic-embed-text", 768),
        _ => ("all-MiniLM-L6-v2", 384),
    }
}

/// Create an embedding provider from configuration, wrapped with the
/// configured per-call deadline.
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let (default_model, default_dim) = provider_defaults(&config.provider);
    let model = if config.model.is_empty() {
        default_model.to_string()
    } else {
        config.model.clone()
    };
    let dimension = if config.dimension == 0 {
        default_dim
    } else {
        config.dimension
    };

    let inner: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "openai" => {
            let api_key = if config.api_key.is_empty() {
                std::env::var("OPENAI_API_KEY").unwrap_or_default()
            } else {
                config.api_key.clone()
            };
            let mut provider = openai::OpenAiEmbedding::new(api_key).with_model(model, dimension);
            if !config.base_url.is_empty() {
                provider = provider.with_base_url(config.base_url.clone());
            }
            Arc::new(provider)
        }
        "ollama" => {
            let mut provider = ollama::OllamaEmbedding::new(&model).with_dimension(dimension);
            if !config.base_url.is_empty() {
                provider = provider.with_base_url(config.base_url.clone());
            }
            Arc::new(provider)
        }
        "local" => {
            #[cfg(feature = "local-embeddings")]
            {
                Arc::new(local::LocalEmbedding::new(&model, dimension)?)
            }
            #[cfg(not(feature = "local-embeddings"))]
            {
                return Err(MemoryError::Config(
                    "embedding.provider = \"local\" requires the `local-embeddings` \
                     feature; rebuild with --features local-embeddings or configure \
                     openai/ollama"
                        .into(),
                ));
            }
        }
        other => {
            return Err(MemoryError::Config(format!(
                "unknown embedding provider {other:?} (supported: openai, ollama, local)"
            )));
        }
    };

    Ok(Arc::new(Deadline::new(
        inner,
        Duration::from_secs(config.timeout_secs.max(1)),
    )))
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-6 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Wraps a provider with a per-call deadline and output normalization.
///
/// On timeout the call fails with `EmbeddingUnavailable`; callers decide
/// whether to propagate (writer) or degrade to FTS-only (retriever).
pub struct Deadline {
    inner: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl Deadline {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl EmbeddingProvider for Deadline {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vecs = tokio::time::timeout(self.timeout, self.inner.embed(texts))
            .await
            .map_err(|_| {
                MemoryError::EmbeddingUnavailable(format!(
                    "{} timed out after {:?}",
                    self.inner.name(),
                    self.timeout
                ))
            })??;
        for v in &mut vecs {
            l2_normalize(v);
        }
        Ok(vecs)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
