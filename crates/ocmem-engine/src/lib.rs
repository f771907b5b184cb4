//! # ocmem-engine
//!
//! The OpenClaw Memory engine: Markdown files are the source of truth,
//! chunked and embedded into a per-scope SQLite index (sqlite-vec + FTS5),
//! written through a quality-gated pipeline and read back through hybrid
//! salience-ranked retrieval.

pub mod chunker;
pub mod frontmatter;
pub mod fsio;
pub mod indexer;
pub mod primer;
pub mod privacy;
pub mod retriever;
pub mod service;
pub mod store;
pub mod watcher;
pub mod writer;

pub use primer::{Observation, SessionSummary, TaskEntry};
pub use retriever::{ScopeFilter, SearchHit, SearchResponse};
pub use service::{MemoryService, ScopeHandle};
pub use store::{ChunkRecord, StoreStats, VectorStore};
