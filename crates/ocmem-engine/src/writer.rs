//! Write pipeline: quality gate → privacy filter → smart router →
//! dedup/conflict/reinforcement → file mutation → re-index.
//!
//! Every accepted note produces exactly one durable effect on one Markdown
//! file within one scope. The index is updated synchronously before the
//! call returns, so a follow-up search observes the write.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{Local, Utc};
use regex::{Regex, RegexBuilder};
use tracing::info;

use ocmem_core::{MemoryKind, RejectReason, Result, Scope, WriteOutcome};
use ocmem_embeddings::EmbeddingProvider;

use crate::frontmatter::Document;
use crate::fsio::{atomic_write, parent_dir};
use crate::indexer;
use crate::privacy::PrivacyFilter;
use crate::service::ScopeHandle;

/// Similarity at or above this reinforces the existing memory.
pub const REINFORCE_THRESHOLD: f32 = 0.92;
/// Similarity in `[CONFLICT, REINFORCE)` replaces the conflicting bullet.
pub const CONFLICT_THRESHOLD: f32 = 0.85;

fn now_stamp() -> String {
    // Whole seconds: file-frontmatter timestamps may tie, list order is
    // the tiebreaker.
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

// ── Quality gate ────────────────────────────────────────────────

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern).case_insensitive(true).build().unwrap()
}

static FILLER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        ci(r"^(我来|让我|I'll|Let me|I will)\s*(帮你|看看|help|check|look)"),
        ci(r"^(好的|OK|Sure|Alright|Got it)"),
        ci(r"^(当然|Of course|Certainly)"),
        ci(r"^(没问题|No problem)"),
        ci(r"^(这是|Here is|Here's|This is)\s*(the|a)?\s*(code|file|result)"),
    ]
});

static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^[\w/\\.-]+\.(py|js|ts|go|rs|java|cpp|c|h)$").unwrap(),
        Regex::new(r"^(import|from|require|include)\s+").unwrap(),
        Regex::new(r"^\s*[\{\[\(]").unwrap(),
    ]
});

const SPECULATIVE_PREFIXES: &[&str] = &[
    "可能", "也许", "或许", "大概", "probably", "maybe", "perhaps", "possibly",
    "i think", "i guess", "might be", "could be", "not sure",
];

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Check a note against the quality gate. `None` means it passed.
pub fn quality_gate(content: &str) -> Option<RejectReason> {
    let text = content.trim();
    let char_count = text.chars().count();
    let cjk_count = text.chars().filter(|c| is_cjk(*c)).count();

    // Predominantly-CJK notes carry more meaning per character.
    let min_len = if cjk_count > 0 && cjk_count * 2 >= char_count {
        10
    } else {
        20
    };
    if char_count < min_len {
        return Some(RejectReason::TooShort);
    }

    if FILLER_PATTERNS.iter().any(|re| re.is_match(text)) {
        return Some(RejectReason::Filler);
    }

    if text.starts_with(['/', '\\', '.'])
        || CODE_PATTERNS.iter().any(|re| re.is_match(text))
    {
        return Some(RejectReason::CodeOrPath);
    }

    let lower = text.to_lowercase();
    if SPECULATIVE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Some(RejectReason::Speculative);
    }

    None
}

// ── Smart routing ───────────────────────────────────────────────

/// Routing decision for an accepted note.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Target file, relative to the scope root.
    pub target: String,
    pub scope: Scope,
    pub kind: MemoryKind,
    pub importance: i64,
}

struct RoutingRule {
    pattern: Regex,
    target: &'static str,
    scope: Scope,
    kind: MemoryKind,
    importance: i64,
}

static ROUTING_RULES: LazyLock<Vec<RoutingRule>> = LazyLock::new(|| {
    vec![
        // Instructions first: "必须用 X" must not fall through to weaker kinds.
        RoutingRule {
            pattern: ci(r"(必须|不要|不允许|禁止|always|never|must|rule|规范|规则|要求|请总是)"),
            target: "user/instructions.md",
            scope: Scope::Global,
            kind: MemoryKind::Instruction,
            importance: 5,
        },
        RoutingRule {
            pattern: ci(r"(决定|采用|选择了?|决策|ADR|decided|chose|adopt)"),
            target: "agent/decisions.md",
            scope: Scope::Project,
            kind: MemoryKind::Decision,
            importance: 5,
        },
        // Patterns before entities, "是" alone matches far too much.
        RoutingRule {
            pattern: ci(r"(发现|总结|规律|模式|解决|pattern|solution|workaround|原因是)"),
            target: "agent/patterns.md",
            scope: Scope::Project,
            kind: MemoryKind::Pattern,
            importance: 3,
        },
        RoutingRule {
            pattern: ci(r"(偏好|喜欢|习惯|prefer|\blike\b|fond of|favor)"),
            target: "user/preferences.md",
            scope: Scope::Global,
            kind: MemoryKind::Preference,
            importance: 4,
        },
        RoutingRule {
            pattern: ci(r"[\u{4e00}-\u{9fff}]{2,4}(是|担任|负责)"),
            target: "user/entities.md",
            scope: Scope::Global,
            kind: MemoryKind::Entity,
            importance: 3,
        },
        RoutingRule {
            pattern: Regex::new(
                r"\b[A-Z][a-z]+(?:\s[A-Z][a-z]+)?\s+(is|role is|works on|leads?|maintains?)\b",
            )
            .unwrap(),
            target: "user/entities.md",
            scope: Scope::Global,
            kind: MemoryKind::Entity,
            importance: 3,
        },
    ]
});

/// Route a note by keyword patterns; first match wins, journal is the
/// fallback.
pub fn route_content(content: &str) -> Route {
    let text = content.trim();
    for rule in ROUTING_RULES.iter() {
        if rule.pattern.is_match(text) {
            return Route {
                target: rule.target.to_string(),
                scope: rule.scope,
                kind: rule.kind,
                importance: rule.importance,
            };
        }
    }
    journal_route()
}

/// Route for an explicit, recognized type hint.
pub fn route_for_kind(kind: MemoryKind) -> Route {
    match kind {
        MemoryKind::Preference => Route {
            target: "user/preferences.md".into(),
            scope: Scope::Global,
            kind,
            importance: 4,
        },
        MemoryKind::Instruction => Route {
            target: "user/instructions.md".into(),
            scope: Scope::Global,
            kind,
            importance: 5,
        },
        MemoryKind::Entity => Route {
            target: "user/entities.md".into(),
            scope: Scope::Global,
            kind,
            importance: 3,
        },
        MemoryKind::Decision => Route {
            target: "agent/decisions.md".into(),
            scope: Scope::Project,
            kind,
            importance: 5,
        },
        MemoryKind::Pattern => Route {
            target: "agent/patterns.md".into(),
            scope: Scope::Project,
            kind,
            importance: 3,
        },
        MemoryKind::Journal => journal_route(),
    }
}

fn journal_route() -> Route {
    Route {
        target: format!("journal/{}.md", today()),
        scope: Scope::Project,
        kind: MemoryKind::Journal,
        importance: 1,
    }
}

// ── File operations ─────────────────────────────────────────────

/// Create `path` with standard frontmatter if it does not exist yet.
pub fn ensure_file(path: &Path, kind: MemoryKind, importance: i64) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let now = now_stamp();
    let mut doc = Document::parse("");
    doc.meta.set("type", kind.as_str());
    doc.meta.set("importance", importance.to_string());
    doc.meta.set("reinforcement", "0");
    doc.meta.set("created", &now);
    doc.meta.set("updated", &now);
    doc.meta.set("status", "active");
    atomic_write(path, &doc.render())
}

/// Append `- <content>` to the file body and touch `updated`.
pub fn append_bullet(path: &Path, content: &str) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut doc = Document::parse(&text);
    doc.meta.set("updated", now_stamp());

    let mut body = doc.body.trim_end().to_string();
    if !body.is_empty() {
        body.push('\n');
    }
    body.push_str("- ");
    body.push_str(content);
    body.push('\n');
    doc.body = body;

    atomic_write(path, &doc.render())
}

/// Replace the bullet whose text best matches `target_text` (by longest
/// common subsequence) with `new_content`. Returns false when the file has
/// no bullets to replace.
pub fn replace_bullet(path: &Path, target_text: &str, new_content: &str) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let text = std::fs::read_to_string(path)?;
    let mut doc = Document::parse(&text);

    let target: Vec<char> = target_text.trim().chars().collect();
    let mut best: Option<(usize, usize)> = None; // (line index, lcs length)

    let lines: Vec<&str> = doc.body.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("- ") {
            continue;
        }
        let bullet: Vec<char> = trimmed[2..].trim().chars().collect();
        let score = lcs_len(&bullet, &target);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((i, score));
        }
    }

    let Some((index, _)) = best else {
        return Ok(false);
    };

    let mut new_lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    new_lines[index] = format!("- {new_content}");
    doc.body = new_lines.join("\n");
    doc.meta.set("updated", now_stamp());

    atomic_write(path, &doc.render())?;
    Ok(true)
}

/// Rewrite the file's frontmatter `reinforcement` and `updated`.
pub fn bump_file_reinforcement(path: &Path, new_value: i64) -> Result<()> {
    if !path.is_file() {
        return Ok(());
    }
    let text = std::fs::read_to_string(path)?;
    let mut doc = Document::parse(&text);
    doc.meta.set("reinforcement", new_value.to_string());
    doc.meta.set("updated", now_stamp());
    atomic_write(path, &doc.render())
}

/// Character-level longest common subsequence length (two-row DP).
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ── Pipeline ────────────────────────────────────────────────────

/// Run the full write pipeline for one note.
pub(crate) async fn smart_write(
    global: &ScopeHandle,
    project: Option<&ScopeHandle>,
    embedder: &dyn EmbeddingProvider,
    privacy: &PrivacyFilter,
    content: &str,
    type_hint: Option<MemoryKind>,
) -> Result<WriteOutcome> {
    let content = content.trim();

    // 1. Quality gate
    if let Some(reason) = quality_gate(content) {
        info!(%reason, "quality gate rejected note");
        return Ok(WriteOutcome::Rejected { reason });
    }

    // 2. Privacy filter
    if privacy.contains_sensitive(content) {
        info!("privacy filter rejected note");
        return Ok(WriteOutcome::Rejected {
            reason: RejectReason::Sensitive,
        });
    }

    // 3. Route
    let route = match type_hint {
        Some(kind) => route_for_kind(kind),
        None => route_content(content),
    };
    let scope = match route.scope {
        Scope::Global => global,
        // Without a project the note still has to land somewhere durable.
        Scope::Project => project.unwrap_or(global),
    };
    let target_parent = parent_dir(&route.target).to_string();

    // 4. Embed (outside the scope lock; the provider is shared).
    let embedding = embedder.embed_single(content).await?;

    // 5-6. Similarity branch + re-index, under the scope lock.
    let _guard = scope.lock.lock().await;

    let filter = if target_parent.is_empty() {
        None
    } else {
        Some(target_parent.as_str())
    };
    let mut candidates = scope.store.find_similar(&embedding, CONFLICT_THRESHOLD, filter)?;
    // Equal similarity resolves to the most recently updated candidate.
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });

    if let Some(best) = candidates.first() {
        let file = scope.root.join(&best.uri);

        if best.score >= REINFORCE_THRESHOLD {
            let new_value = scope.store.increment_reinforcement(&best.id)?;
            bump_file_reinforcement(&file, new_value)?;
            indexer::index_file(&scope.store, embedder, &scope.root, &file).await?;
            info!(uri = %best.uri, score = best.score, "reinforced existing memory");
            return Ok(WriteOutcome::Reinforced {
                path: best.uri.clone(),
                score: best.score,
            });
        }

        if replace_bullet(&file, &best.content, content)? {
            indexer::index_file(&scope.store, embedder, &scope.root, &file).await?;
            info!(uri = %best.uri, score = best.score, "replaced conflicting memory");
            return Ok(WriteOutcome::ConflictUpdated {
                path: best.uri.clone(),
                score: best.score,
            });
        }
    }

    // 7. Append
    let file = scope.root.join(&route.target);
    ensure_file(&file, route.kind, route.importance)?;
    append_bullet(&file, content)?;
    indexer::index_file(&scope.store, embedder, &scope.root, &file).await?;
    info!(target = %route.target, kind = %route.kind, "appended new memory");
    Ok(WriteOutcome::Appended {
        path: route.target,
        kind: route.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Quality gate ───────────────────────────────────────────

    #[test]
    fn gate_too_short() {
        assert_eq!(quality_gate("hi"), Some(RejectReason::TooShort));
        assert_eq!(quality_gate("好的"), Some(RejectReason::TooShort));
    }

    #[test]
    fn gate_filler() {
        assert_eq!(
            quality_gate("我来帮你看看这个问题吧"),
            Some(RejectReason::Filler)
        );
        assert_eq!(
            quality_gate("Let me help you check this"),
            Some(RejectReason::Filler)
        );
    }

    #[test]
    fn gate_code_or_path() {
        assert_eq!(
            quality_gate("/src/components/auth/Login.tsx"),
            Some(RejectReason::CodeOrPath)
        );
        assert_eq!(
            quality_gate("import React from 'react'"),
            Some(RejectReason::CodeOrPath)
        );
        assert_eq!(
            quality_gate("{ \"key\": \"value\", \"other\": 1 }"),
            Some(RejectReason::CodeOrPath)
        );
    }

    #[test]
    fn gate_speculative() {
        assert_eq!(
            quality_gate("可能是 React 版本不兼容导致的问题"),
            Some(RejectReason::Speculative)
        );
        assert_eq!(
            quality_gate("maybe the issue is with the database connection pool"),
            Some(RejectReason::Speculative)
        );
    }

    #[test]
    fn gate_accepts_substantive_notes() {
        assert_eq!(quality_gate("用户偏好使用 TypeScript strict 模式进行开发"), None);
        assert_eq!(quality_gate("决定采用微服务架构来重构支付模块"), None);
        assert_eq!(
            quality_gate("The team decided to use PostgreSQL for persistence"),
            None
        );
    }

    // ── Routing ────────────────────────────────────────────────

    #[test]
    fn route_preference() {
        let route = route_content("用户偏好使用 Vim 键位绑定进行编辑");
        assert_eq!(route.target, "user/preferences.md");
        assert_eq!(route.scope, Scope::Global);
        assert_eq!(route.kind, MemoryKind::Preference);
        assert_eq!(route.importance, 4);
    }

    #[test]
    fn route_instruction() {
        let route = route_content("所有 API 必须返回 snake_case 格式数据");
        assert_eq!(route.target, "user/instructions.md");
        assert_eq!(route.scope, Scope::Global);
        assert_eq!(route.kind, MemoryKind::Instruction);
        assert_eq!(route.importance, 5);
    }

    #[test]
    fn route_entity() {
        let route = route_content("张三是后端团队负责人，主要维护支付服务");
        assert_eq!(route.target, "user/entities.md");
        assert_eq!(route.kind, MemoryKind::Entity);

        let route = route_content("Alice Johnson leads the infrastructure group");
        assert_eq!(route.target, "user/entities.md");
        assert_eq!(route.kind, MemoryKind::Entity);
    }

    #[test]
    fn route_decision() {
        let route = route_content("决定采用 Redis 作为缓存层来提升查询性能");
        assert_eq!(route.target, "agent/decisions.md");
        assert_eq!(route.scope, Scope::Project);
        assert_eq!(route.kind, MemoryKind::Decision);
        assert_eq!(route.importance, 5);
    }

    #[test]
    fn route_pattern() {
        let route = route_content("发现 N+1 查询问题的解决方案是使用 selectinload");
        assert_eq!(route.target, "agent/patterns.md");
        assert_eq!(route.kind, MemoryKind::Pattern);
        assert_eq!(route.importance, 3);
    }

    #[test]
    fn route_default_is_journal() {
        let route = route_content("今天完成了用户认证模块的代码审查工作");
        assert!(route.target.starts_with("journal/"));
        assert!(route.target.ends_with(".md"));
        assert_eq!(route.scope, Scope::Project);
        assert_eq!(route.kind, MemoryKind::Journal);
        assert_eq!(route.importance, 1);
    }

    #[test]
    fn route_hint_wins() {
        let route = route_for_kind(MemoryKind::Decision);
        assert_eq!(route.target, "agent/decisions.md");
    }

    // ── File operations ────────────────────────────────────────

    #[test]
    fn ensure_append_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user/preferences.md");

        ensure_file(&path, MemoryKind::Preference, 4).unwrap();
        let doc = Document::parse(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(doc.meta.get("type"), Some("preference"));
        assert_eq!(doc.meta.get_int("reinforcement"), Some(0));
        assert_eq!(doc.meta.get("status"), Some("active"));

        append_bullet(&path, "prefers tabs over spaces").unwrap();
        append_bullet(&path, "prefers dark mode").unwrap();
        let doc = Document::parse(&std::fs::read_to_string(&path).unwrap());
        let bullets: Vec<&str> = doc.body.lines().filter(|l| l.starts_with("- ")).collect();
        assert_eq!(bullets.len(), 2);
        assert_eq!(bullets[0], "- prefers tabs over spaces");
    }

    #[test]
    fn ensure_file_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.md");
        ensure_file(&path, MemoryKind::Pattern, 3).unwrap();
        append_bullet(&path, "existing content bullet").unwrap();
        ensure_file(&path, MemoryKind::Pattern, 3).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("existing content bullet"));
    }

    #[test]
    fn replace_bullet_picks_best_lcs_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent/decisions.md");
        ensure_file(&path, MemoryKind::Decision, 5).unwrap();
        append_bullet(&path, "决定使用 PostgreSQL 作为数据库，SQLAlchemy 2.0 作为 ORM").unwrap();
        append_bullet(&path, "决定前端使用 React 18 和 Vite").unwrap();

        let replaced = replace_bullet(
            &path,
            "决定使用 PostgreSQL 作为数据库，SQLAlchemy 2.0 作为 ORM",
            "决定将 ORM 从 SQLAlchemy 2.0 更换为 Tortoise ORM",
        )
        .unwrap();
        assert!(replaced);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Tortoise ORM"));
        assert!(!text.contains("SQLAlchemy 2.0 作为 ORM"));
        // The unrelated bullet is untouched.
        assert!(text.contains("React 18"));
        // Exactly one ORM bullet remains.
        assert_eq!(text.matches("ORM").count(), 2); // "ORM 从…" + "Tortoise ORM"
    }

    #[test]
    fn replace_bullet_without_bullets_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.md");
        ensure_file(&path, MemoryKind::Pattern, 3).unwrap();
        assert!(!replace_bullet(&path, "anything", "new").unwrap());
        assert!(!replace_bullet(&dir.path().join("missing.md"), "x", "y").unwrap());
    }

    #[test]
    fn bump_reinforcement_updates_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user/preferences.md");
        ensure_file(&path, MemoryKind::Preference, 4).unwrap();
        bump_file_reinforcement(&path, 3).unwrap();

        let doc = Document::parse(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(doc.meta.get_int("reinforcement"), Some(3));
    }

    #[test]
    fn lcs_prefers_closer_strings() {
        let a: Vec<char> = "decided to use postgres".chars().collect();
        let b: Vec<char> = "decided to use postgresql".chars().collect();
        let c: Vec<char> = "weekly planning meeting".chars().collect();
        assert!(lcs_len(&a, &b) > lcs_len(&a, &c));
    }
}
