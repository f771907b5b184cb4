use thiserror::Error;

/// Unified error type for the OpenClaw Memory service.
#[derive(Error, Debug)]
pub enum MemoryError {
    // ── Configuration errors ───────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Storage errors ─────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    // ── Embedding provider errors ──────────────────────────────
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    // ── Lookup errors ──────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    // ── Lifecycle ──────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MemoryError {
    /// Short kind tag used when rendering `Error: <kind>: <message>` replies.
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryError::Config(_) => "ConfigError",
            MemoryError::Storage(_) => "StorageError",
            MemoryError::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            MemoryError::NotFound(_) => "NotFound",
            MemoryError::Cancelled => "Cancelled",
            MemoryError::Io(_) => "IoError",
            MemoryError::Serialization(_) => "SerializationError",
            MemoryError::Other(_) => "Error",
        }
    }

    /// The bare message, without the kind prefix `Display` adds.
    pub fn message(&self) -> String {
        match self {
            MemoryError::Config(m)
            | MemoryError::Storage(m)
            | MemoryError::EmbeddingUnavailable(m)
            | MemoryError::NotFound(m) => m.clone(),
            MemoryError::Cancelled => "operation cancelled".into(),
            MemoryError::Io(e) => e.to_string(),
            MemoryError::Serialization(e) => e.to_string(),
            MemoryError::Other(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
