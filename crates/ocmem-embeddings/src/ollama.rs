//! Ollama embeddings provider (`/api/embeddings` endpoint, one text per call).

use async_trait::async_trait;
use serde::Deserialize;

use ocmem_core::{MemoryError, Result};

use crate::EmbeddingProvider;

pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedding {
    pub fn new(model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "http://localhost:11434".into(),
            model: model.to_string(),
            dims: 768, // nomic-embed-text default, varies by model
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_dimension(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for text in texts {
            let body = serde_json::json!({
                "model": &self.model,
                "prompt": text,
            });

            let resp = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    MemoryError::EmbeddingUnavailable(format!("ollama request failed: {e}"))
                })?;

            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(MemoryError::EmbeddingUnavailable(format!(
                    "ollama error: {}",
                    &text[..text.len().min(200)]
                )));
            }

            let parsed: OllamaResponse = resp.json().await.map_err(|e| {
                MemoryError::EmbeddingUnavailable(format!("ollama parse error: {e}"))
            })?;

            if parsed.embedding.is_empty() {
                return Err(MemoryError::EmbeddingUnavailable(
                    "ollama returned an empty embedding".into(),
                ));
            }
            results.push(parsed.embedding);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
