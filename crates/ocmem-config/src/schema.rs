use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — the merged view of `config.toml`,
/// `.openclaw_memory.toml`, and `OPENCLAW_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub project: ProjectMeta,
    pub embedding: EmbeddingConfig,
    pub privacy: PrivacyConfig,
    pub search: SearchConfig,

    /// Root of the global (cross-project) scope. Not read from TOML.
    #[serde(skip)]
    pub global_root: PathBuf,
    /// Detected project root (the repository, not the memory dir).
    /// `None` when no project was detected.
    #[serde(skip)]
    pub project_root: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            project: ProjectMeta::default(),
            embedding: EmbeddingConfig::default(),
            privacy: PrivacyConfig::default(),
            search: SearchConfig::default(),
            global_root: default_global_root(),
            project_root: None,
        }
    }
}

pub fn default_global_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".openclaw_memory")
}

impl MemoryConfig {
    /// `~/.openclaw_memory/user/`
    pub fn global_user_dir(&self) -> PathBuf {
        self.global_root.join("user")
    }

    /// `~/.openclaw_memory/index.db`
    pub fn global_index_db(&self) -> PathBuf {
        self.global_root.join("index.db")
    }

    /// `<project>/.openclaw_memory/`, if a project was detected.
    pub fn project_memory_dir(&self) -> Option<PathBuf> {
        self.project_root
            .as_ref()
            .map(|r| r.join(".openclaw_memory"))
    }

    /// `<project>/.openclaw_memory/index.db`, if a project was detected.
    pub fn project_index_db(&self) -> Option<PathBuf> {
        self.project_memory_dir().map(|d| d.join("index.db"))
    }

    /// Validate the merged configuration. Returns warnings for odd but
    /// workable values, errors for values the service cannot start with.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "local" => {}
            other => {
                return Err(format!(
                    "unknown embedding provider {other:?} (supported: openai, ollama, local)"
                ));
            }
        }

        if self.search.default_max_tokens == 0 {
            return Err("search.default_max_tokens must be positive".into());
        }
        if self.search.recency_half_life_days <= 0.0 {
            return Err("search.recency_half_life_days must be positive".into());
        }
        if self.search.default_top_k == 0 {
            warnings.push("search.default_top_k is 0, every search will be empty".into());
        }
        if self.privacy.enabled && self.privacy.patterns.is_empty() {
            warnings.push("privacy filter enabled with an empty pattern list".into());
        }

        Ok(warnings)
    }
}

// ── Project ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMeta {
    /// Project display name shown in the primer.
    pub name: String,
    /// One-line project description.
    pub description: String,
}

// ── Embedding ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// One of "openai", "ollama", "local".
    pub provider: String,
    /// Model name; empty = provider default.
    pub model: String,
    /// Embedding dimension; 0 = provider default.
    pub dimension: usize,
    /// API key for hosted providers; empty = read from environment.
    pub api_key: String,
    /// Override base URL (Azure-style endpoints, non-default Ollama hosts).
    pub base_url: String,
    /// Per-call deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: String::new(),
            dimension: 0,
            api_key: String::new(),
            base_url: String::new(),
            timeout_secs: 30,
        }
    }
}

// ── Privacy ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub enabled: bool,
    /// Regexes that block a note from being stored. Setting this in config
    /// REPLACES the defaults, it does not extend them.
    pub patterns: Vec<String>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_privacy_patterns(),
        }
    }
}

pub fn default_privacy_patterns() -> Vec<String> {
    vec![
        r"sk-[a-zA-Z0-9]{20,}".into(),     // OpenAI-style API key
        r"ghp_[a-zA-Z0-9]{36}".into(),     // GitHub token
        r"password\s*[:=]\s*\S+".into(),   // password assignment
        r"secret\s*[:=]\s*\S+".into(),     // secret assignment
        r"192\.168\.\d+\.\d+".into(),      // RFC1918 internal IPs
        r"10\.\d+\.\d+\.\d+".into(),       // RFC1918 internal IPs
        r"localhost:\d+".into(),           // local services
    ]
}

// ── Search ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Token budget when the caller does not pass one.
    pub default_max_tokens: usize,
    /// Half-life of the recency decay term, in days.
    pub recency_half_life_days: f64,
    /// Result-count target; candidate fetches over-fetch 2x this.
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 1500,
            recency_half_life_days: 30.0,
            default_top_k: 10,
        }
    }
}
