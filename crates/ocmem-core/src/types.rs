use serde::{Deserialize, Serialize};

/// The two memory partitions. Every install has exactly one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Cross-project user memory under `~/.openclaw_memory/`.
    Global,
    /// Per-repository working memory under `<project>/.openclaw_memory/`.
    Project,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Project => write!(f, "project"),
        }
    }
}

/// Classification assigned to a memory by the router (or by frontmatter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Preference,
    Instruction,
    Entity,
    Decision,
    Pattern,
    Journal,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Preference => "preference",
            MemoryKind::Instruction => "instruction",
            MemoryKind::Entity => "entity",
            MemoryKind::Decision => "decision",
            MemoryKind::Pattern => "pattern",
            MemoryKind::Journal => "journal",
        }
    }

    /// Parse a kind name. Accepts `event` as a legacy alias for `journal`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Some(MemoryKind::Preference),
            "instruction" => Some(MemoryKind::Instruction),
            "entity" => Some(MemoryKind::Entity),
            "decision" => Some(MemoryKind::Decision),
            "pattern" => Some(MemoryKind::Pattern),
            "journal" | "event" => Some(MemoryKind::Journal),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the write pipeline refused a note. A refusal is a normal outcome,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort,
    Filler,
    CodeOrPath,
    Speculative,
    Sensitive,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooShort => write!(f, "too short"),
            RejectReason::Filler => write!(f, "filler phrase"),
            RejectReason::CodeOrPath => write!(f, "code or path"),
            RejectReason::Speculative => write!(f, "speculative"),
            RejectReason::Sensitive => write!(f, "contains sensitive information"),
        }
    }
}

/// The single durable effect produced by one `log` call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// A new bullet was appended to `path`.
    Appended { path: String, kind: MemoryKind },
    /// A near-duplicate existed; its reinforcement counter was bumped.
    Reinforced { path: String, score: f32 },
    /// A conflicting bullet in `path` was replaced in place.
    ConflictUpdated { path: String, score: f32 },
    /// The note failed the quality gate or the privacy filter.
    Rejected { reason: RejectReason },
}

impl WriteOutcome {
    /// Render the one-line reply for the `log` verb.
    pub fn reply(&self) -> String {
        match self {
            WriteOutcome::Appended { path, kind } => {
                format!("Memory saved to {path} (type: {kind})")
            }
            WriteOutcome::Reinforced { path, score } => {
                format!("Existing memory reinforced (score={score:.2}) in {path}")
            }
            WriteOutcome::ConflictUpdated { path, score } => {
                format!("Conflicting memory updated (score={score:.2}) in {path}")
            }
            WriteOutcome::Rejected { reason } => format!("Rejected: {reason}"),
        }
    }
}
