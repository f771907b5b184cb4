//! Mock embedding provider for deterministic testing.
//!
//! By default each text maps to a deterministic hashed bag-of-words vector,
//! so identical texts embed identically and overlapping texts land near each
//! other. Tests that need exact similarities can pin per-text vectors.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ocmem_core::{MemoryError, Result};

use crate::{l2_normalize, EmbeddingProvider};

pub struct MockEmbedding {
    dims: usize,
    pinned: Arc<Mutex<HashMap<String, Vec<f32>>>>,
    fail_with: Arc<Mutex<Option<String>>>,
    /// Every text this provider was asked to embed, for assertions.
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            pinned: Arc::new(Mutex::new(HashMap::new())),
            fail_with: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Pin an exact (pre-normalization) vector for a text.
    pub fn with_vector(self, text: &str, vec: Vec<f32>) -> Self {
        self.pinned.lock().unwrap().insert(text.to_string(), vec);
        self
    }

    /// Make every call fail with `EmbeddingUnavailable`.
    pub fn with_failure(self, message: &str) -> Self {
        self.set_failure(Some(message));
        self
    }

    /// Toggle the failure mode after construction (provider outage tests).
    pub fn set_failure(&self, message: Option<&str>) {
        *self.fail_with.lock().unwrap() = message.map(str::to_string);
    }

    /// Deterministic hashed bag-of-words vector.
    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            let idx = (hash as usize) % self.dims;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vec[idx] += sign;
        }
        l2_normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(MemoryError::EmbeddingUnavailable(msg));
        }
        let pinned = self.pinned.lock().unwrap();
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            self.requests.lock().unwrap().push(text.clone());
            match pinned.get(text) {
                Some(vec) => out.push(vec.clone()),
                None => out.push(self.hash_embed(text)),
            }
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}
