//! Fully offline embeddings via fastembed (ONNX all-MiniLM-L6-v2).
//!
//! Model files are cached locally by fastembed; after the first download no
//! network access is needed. Inference is CPU-bound, so it runs on the
//! blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::info;

use ocmem_core::{MemoryError, Result};

use crate::EmbeddingProvider;

pub struct LocalEmbedding {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dims: usize,
}

impl LocalEmbedding {
    pub fn new(model_name: &str, dims: usize) -> Result<Self> {
        let model_kind = match model_name {
            "all-MiniLM-L6-v2" | "" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            other => {
                return Err(MemoryError::Config(format!(
                    "unsupported local embedding model {other:?}"
                )));
            }
        };

        info!(model = model_name, "loading local embedding model");
        let model = TextEmbedding::try_new(
            InitOptions::new(model_kind).with_show_download_progress(false),
        )
        .map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("failed to load local model: {e}"))
        })?;
        info!(model = model_name, "local embedding model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dims,
        })
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = Arc::clone(&self.model);
        let texts: Vec<String> = texts.to_vec();
        let dims = self.dims;

        // fastembed inference blocks; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut model = model.lock();
            let vecs = model
                .embed(texts, None)
                .map_err(|e| MemoryError::EmbeddingUnavailable(format!("local embed: {e}")))?;
            Ok(vecs
                .into_iter()
                .map(|mut v| {
                    v.truncate(dims);
                    v
                })
                .collect())
        })
        .await
        .map_err(|e| MemoryError::EmbeddingUnavailable(format!("local embed task: {e}")))?
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "local"
    }
}
