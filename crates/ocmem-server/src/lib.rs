//! # ocmem-server
//!
//! The tool surface of the memory service: seven verbs, JSON-argument /
//! string-reply, over either a line-delimited stdio protocol or
//! server-sent events on a port. Engine construction is deferred to the
//! first verb so the transport can come up (and report readiness)
//! instantly.

pub mod http;
pub mod stdio;
pub mod verbs;

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use ocmem_config::MemoryConfig;
use ocmem_core::Result;
use ocmem_engine::MemoryService;

/// Shared transport state: configuration plus the lazily-built engine.
pub struct Gateway {
    config: MemoryConfig,
    service: OnceCell<Arc<MemoryService>>,
}

impl Gateway {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            service: OnceCell::new(),
        }
    }

    /// Has the engine been built yet?
    pub fn ready(&self) -> bool {
        self.service.initialized()
    }

    /// Get the engine, building it (provider, stores, watchers) on first
    /// use.
    pub async fn service(&self) -> Result<Arc<MemoryService>> {
        self.service
            .get_or_try_init(|| async {
                let embedder = ocmem_embeddings::provider_from_config(&self.config.embedding)?;
                let service = Arc::new(MemoryService::open(self.config.clone(), embedder)?);
                service.start_watchers()?;
                info!("engine initialized on first verb");
                Ok(service)
            })
            .await
            .cloned()
    }

    /// Run one verb, rendering initialization failures the same way verb
    /// failures render.
    pub async fn handle(&self, verb: &str, args: &serde_json::Value) -> String {
        match self.service().await {
            Ok(service) => verbs::dispatch(&service, verb, args).await,
            Err(e) => format!("Error: {}: {}", e.kind(), e.message()),
        }
    }
}
