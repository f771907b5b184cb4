//! # ocmem-config
//!
//! Layered configuration for the memory service: built-in defaults, the
//! global `config.toml`, the project `.openclaw_memory.toml`, and
//! `OPENCLAW_*` environment overrides, merged in that order.

pub mod loader;
pub mod schema;

pub use loader::{detect_project_root, ensure_directories, ConfigLoader};
pub use schema::{
    default_privacy_patterns, EmbeddingConfig, MemoryConfig, PrivacyConfig, ProjectMeta,
    SearchConfig,
};
