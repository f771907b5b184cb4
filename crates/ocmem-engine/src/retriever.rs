//! Read pipeline: fast path → timeline path → hybrid search with
//! reciprocal-rank fusion, salience scoring, and token budgeting.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use ocmem_core::{MemoryError, Result, Scope};
use ocmem_embeddings::EmbeddingProvider;

use crate::chunker::estimate_tokens;
use crate::service::ScopeHandle;
use crate::store::ChunkRecord;

// Salience weights; must sum to 1.0.
const W_SEMANTIC: f64 = 0.50;
const W_REINFORCEMENT: f64 = 0.20;
const W_RECENCY: f64 = 0.20;
const W_ACCESS: f64 = 0.10;

/// RRF constant.
const RRF_K: f64 = 60.0;

/// Scope restriction accepted by `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    Global,
    Project,
    Journal,
    Agent,
    User,
}

impl ScopeFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Some(ScopeFilter::Global),
            "project" => Some(ScopeFilter::Project),
            "journal" => Some(ScopeFilter::Journal),
            "agent" => Some(ScopeFilter::Agent),
            "user" => Some(ScopeFilter::User),
            _ => None,
        }
    }
}

/// A ranked, budgeted search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub uri: String,
    pub content: String,
    pub salience: f64,
    pub semantic: f32,
    pub kind: String,
    pub section: String,
    pub reinforcement: i64,
    pub token_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_tokens: i64,
    pub budget_remaining: i64,
    /// True when the fast path or timeline path answered without the index.
    pub fast_path: bool,
    /// True when embedding was unavailable and the hybrid stage ran FTS-only.
    pub partial: bool,
}

// ── Fast path ───────────────────────────────────────────────────

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern).case_insensitive(true).build().unwrap()
}

static FAST_PATH_RULES: LazyLock<Vec<(Regex, Scope, &'static str)>> = LazyLock::new(|| {
    vec![
        (ci(r"(偏好|preference|喜欢什么|习惯)"), Scope::Global, "user/preferences.md"),
        (ci(r"(指令|规则|规范|instruction|rule)"), Scope::Global, "user/instructions.md"),
        (ci(r"(任务|进度|task|todo|待办)"), Scope::Project, "TASKS.md"),
        (ci(r"(实体|人物|谁是|负责人|团队|成员|entity|people)"), Scope::Global, "user/entities.md"),
        (ci(r"(决策|decision|ADR)"), Scope::Project, "agent/decisions.md"),
        (ci(r"(模式|方案|pattern|solution)"), Scope::Project, "agent/patterns.md"),
    ]
});

static TIMELINE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        ci(r"(最近|近期|这几天|today|recent|past\s*\d+\s*days?)"),
        ci(r"(上周|上个星期|last\s*week)"),
        ci(r"(昨天|前天|yesterday)"),
    ]
});

// ── Salience ────────────────────────────────────────────────────

/// Composite salience: semantic similarity, reinforcement, recency decay,
/// and access frequency. Normalization maxima come from the result set of
/// the current query.
pub fn compute_salience(
    semantic: f32,
    reinforcement: i64,
    max_reinforcement: i64,
    access_count: i64,
    max_access: i64,
    updated_at: &str,
    half_life_days: f64,
) -> f64 {
    let reinf_score =
        ((reinforcement + 1) as f64).ln() / ((max_reinforcement + 2) as f64).ln();
    let access_score = ((access_count + 1) as f64).ln() / ((max_access + 2) as f64).ln();

    let recency = match DateTime::parse_from_rfc3339(updated_at) {
        Ok(updated) => {
            let days = (Utc::now() - updated.with_timezone(&Utc))
                .num_seconds()
                .max(0) as f64
                / 86_400.0;
            let lambda = std::f64::consts::LN_2 / half_life_days;
            (-lambda * days).exp()
        }
        Err(_) => 0.5,
    };

    W_SEMANTIC * semantic as f64
        + W_REINFORCEMENT * reinf_score
        + W_RECENCY * recency
        + W_ACCESS * access_score
}

// ── Entry point ─────────────────────────────────────────────────

pub(crate) async fn search(
    global: &ScopeHandle,
    project: Option<&ScopeHandle>,
    embedder: &dyn EmbeddingProvider,
    search_cfg: &ocmem_config::SearchConfig,
    query: &str,
    scope_filter: Option<ScopeFilter>,
    max_tokens: Option<usize>,
) -> Result<SearchResponse> {
    let budget = max_tokens.unwrap_or(search_cfg.default_max_tokens) as i64;

    // Stage 1: fast path — certain queries name a file directly.
    if scope_filter.is_none() {
        if let Some(response) = try_fast_path(global, project, query, budget) {
            return Ok(response);
        }
    }

    // Stage 2: timeline path.
    let timeline_query = TIMELINE_PATTERNS.iter().any(|re| re.is_match(query));
    if scope_filter == Some(ScopeFilter::Journal) || (scope_filter.is_none() && timeline_query) {
        return Ok(read_recent_journals(project, budget));
    }

    // Stage 3: hybrid search.
    hybrid_search(
        global,
        project,
        embedder,
        search_cfg,
        query,
        scope_filter,
        budget,
    )
    .await
}

fn try_fast_path(
    global: &ScopeHandle,
    project: Option<&ScopeHandle>,
    query: &str,
    budget: i64,
) -> Option<SearchResponse> {
    for (pattern, scope, rel) in FAST_PATH_RULES.iter() {
        if !pattern.is_match(query) {
            continue;
        }
        let root = match scope {
            Scope::Global => &global.root,
            Scope::Project => &project?.root,
        };
        let path = root.join(rel);
        if !path.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        let tokens = estimate_tokens(&content) as i64;
        debug!(file = rel, "fast path hit");
        // Bypasses the index entirely: no access counters are touched.
        return Some(SearchResponse {
            results: vec![SearchHit {
                id: "fast-path".into(),
                uri: (*rel).to_string(),
                content,
                salience: 1.0,
                semantic: 1.0,
                kind: String::new(),
                section: String::new(),
                reinforcement: 0,
                token_count: tokens,
            }],
            total_tokens: tokens,
            budget_remaining: budget - tokens,
            fast_path: true,
            partial: false,
        });
    }
    None
}

/// Read `journal/*.md` newest-first (filenames are `YYYY-MM-DD.md`),
/// accumulating whole files until the budget is met.
fn read_recent_journals(project: Option<&ScopeHandle>, budget: i64) -> SearchResponse {
    let mut response = SearchResponse {
        budget_remaining: budget,
        fast_path: true,
        ..Default::default()
    };
    let Some(project) = project else {
        return response;
    };

    let journal_dir = project.root.join("journal");
    let Ok(entries) = std::fs::read_dir(&journal_dir) else {
        return response;
    };

    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    files.sort();
    files.reverse();

    for path in files {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let tokens = estimate_tokens(&content) as i64;
        if response.total_tokens + tokens > budget {
            break;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        response.results.push(SearchHit {
            id: "timeline".into(),
            uri: format!("journal/{name}"),
            content,
            salience: 1.0,
            semantic: 1.0,
            kind: "journal".into(),
            section: String::new(),
            reinforcement: 0,
            token_count: tokens,
        });
        response.total_tokens += tokens;
    }
    response.budget_remaining = budget - response.total_tokens;
    response
}

// ── Hybrid search ───────────────────────────────────────────────

type Key = (Scope, String);

async fn hybrid_search(
    global: &ScopeHandle,
    project: Option<&ScopeHandle>,
    embedder: &dyn EmbeddingProvider,
    search_cfg: &ocmem_config::SearchConfig,
    query: &str,
    scope_filter: Option<ScopeFilter>,
    budget: i64,
) -> Result<SearchResponse> {
    let top_k = search_cfg.default_top_k;
    let fetch = top_k * 2;

    // Which (store, parent_dir restriction) pairs participate.
    let mut targets: Vec<(&ScopeHandle, Option<&str>)> = Vec::new();
    match scope_filter {
        None => {
            targets.push((global, None));
            if let Some(p) = project {
                targets.push((p, None));
            }
        }
        Some(ScopeFilter::Global) => targets.push((global, None)),
        Some(ScopeFilter::User) => targets.push((global, Some("user"))),
        Some(ScopeFilter::Project) => {
            if let Some(p) = project {
                targets.push((p, None));
            }
        }
        Some(ScopeFilter::Agent) => {
            if let Some(p) = project {
                targets.push((p, Some("agent")));
            }
        }
        // Journal queries take the timeline path before we get here.
        Some(ScopeFilter::Journal) => {}
    }

    // Vector leg: degrade to FTS-only when the provider is down.
    let mut partial = false;
    let query_vec = match embedder.embed_single(query).await {
        Ok(v) => Some(v),
        Err(MemoryError::EmbeddingUnavailable(reason)) => {
            warn!(%reason, "embedding unavailable, degrading to full-text only");
            partial = true;
            None
        }
        Err(e) => return Err(e),
    };

    let mut vector_leg: Vec<(Scope, ChunkRecord)> = Vec::new();
    if let Some(ref qv) = query_vec {
        for (handle, pd) in &targets {
            for record in handle.store.vector_search(qv, fetch, *pd)? {
                vector_leg.push((handle.scope, record));
            }
        }
        vector_leg.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let mut fts_leg: Vec<(Scope, ChunkRecord)> = Vec::new();
    for (handle, pd) in &targets {
        for record in handle.store.fts_search(query, fetch, *pd)? {
            fts_leg.push((handle.scope, record));
        }
    }
    fts_leg.sort_by(|a, b| {
        b.1.score
            .partial_cmp(&a.1.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // RRF merge; the vector-leg similarity is kept as the semantic signal.
    let merged = rrf_merge(&vector_leg, &fts_leg);

    // Normalization maxima over the candidate set of this query.
    let max_reinforcement = merged.iter().map(|m| m.record.reinforcement).max().unwrap_or(0);
    let max_access = merged.iter().map(|m| m.record.access_count).max().unwrap_or(0);

    let mut scored: Vec<(Scope, SearchHit)> = merged
        .into_iter()
        .map(|m| {
            let salience = compute_salience(
                m.semantic,
                m.record.reinforcement,
                max_reinforcement,
                m.record.access_count,
                max_access,
                &m.record.updated_at,
                search_cfg.recency_half_life_days,
            );
            (
                m.scope,
                SearchHit {
                    id: m.record.id,
                    uri: m.record.uri,
                    content: m.record.content,
                    salience,
                    semantic: m.semantic,
                    kind: m.record.kind,
                    section: m.record.section,
                    reinforcement: m.record.reinforcement,
                    token_count: m.record.token_count,
                },
            )
        })
        .collect();

    // Salience descending, ties by id ascending.
    scored.sort_by(|a, b| {
        b.1.salience
            .partial_cmp(&a.1.salience)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    // Token budget: stop at the first chunk that would overflow.
    let mut response = SearchResponse {
        partial,
        ..Default::default()
    };
    let mut accepted: HashMap<Scope, Vec<String>> = HashMap::new();
    for (scope, hit) in scored {
        if response.total_tokens + hit.token_count > budget {
            break;
        }
        response.total_tokens += hit.token_count;
        accepted.entry(scope).or_default().push(hit.id.clone());
        response.results.push(hit);
    }
    response.budget_remaining = budget - response.total_tokens;

    // Access counters: batched per scope, best-effort.
    for (scope, ids) in accepted {
        let handle = match scope {
            Scope::Global => Some(global),
            Scope::Project => project,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.store.increment_access_counts(&ids) {
                warn!(%scope, error = %e, "access count bump failed");
            }
        }
    }

    Ok(response)
}

struct Merged {
    scope: Scope,
    record: ChunkRecord,
    semantic: f32,
    rrf: f64,
}

/// Reciprocal-rank fusion of the vector and full-text legs.
/// `score = Σ 1/(k + rank + 1)` over the lists a chunk appears in.
fn rrf_merge(
    vector_leg: &[(Scope, ChunkRecord)],
    fts_leg: &[(Scope, ChunkRecord)],
) -> Vec<Merged> {
    let mut by_key: HashMap<Key, Merged> = HashMap::new();

    for (rank, (scope, record)) in vector_leg.iter().enumerate() {
        let rrf = 1.0 / (RRF_K + rank as f64 + 1.0);
        let key = (*scope, record.id.clone());
        by_key
            .entry(key)
            .and_modify(|m| m.rrf += rrf)
            .or_insert_with(|| Merged {
                scope: *scope,
                record: record.clone(),
                semantic: record.score,
                rrf,
            });
    }

    for (rank, (scope, record)) in fts_leg.iter().enumerate() {
        let rrf = 1.0 / (RRF_K + rank as f64 + 1.0);
        let key = (*scope, record.id.clone());
        by_key
            .entry(key)
            .and_modify(|m| m.rrf += rrf)
            .or_insert_with(|| Merged {
                scope: *scope,
                record: record.clone(),
                semantic: 0.0, // absent from the vector leg
                rrf,
            });
    }

    let mut merged: Vec<Merged> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.rrf
            .partial_cmp(&a.rrf)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, score: f32) -> ChunkRecord {
        ChunkRecord {
            id: id.into(),
            uri: "x.md".into(),
            content: String::new(),
            content_hash: id.into(),
            parent_dir: String::new(),
            kind: String::new(),
            section: String::new(),
            importance: 1,
            reinforcement: 0,
            access_count: 0,
            token_count: 10,
            created_at: String::new(),
            updated_at: String::new(),
            score,
        }
    }

    // ── Salience ───────────────────────────────────────────────

    fn recent() -> String {
        Utc::now().to_rfc3339()
    }

    #[test]
    fn salience_semantic_dominates() {
        let score = compute_salience(0.9, 0, 10, 0, 10, &recent(), 30.0);
        assert!(score > 0.4);
        assert!(score < 1.0);
    }

    #[test]
    fn salience_reinforcement_boost() {
        let low = compute_salience(0.5, 0, 10, 0, 10, &recent(), 30.0);
        let high = compute_salience(0.5, 10, 10, 0, 10, &recent(), 30.0);
        assert!(high > low);
    }

    #[test]
    fn salience_recency_boost() {
        let fresh = compute_salience(0.5, 0, 0, 0, 0, &recent(), 30.0);
        let stale = compute_salience(0.5, 0, 0, 0, 0, "2020-01-01T10:00:00+00:00", 30.0);
        assert!(fresh > stale);
    }

    #[test]
    fn salience_access_boost() {
        let low = compute_salience(0.5, 0, 0, 0, 10, &recent(), 30.0);
        let high = compute_salience(0.5, 0, 0, 10, 10, &recent(), 30.0);
        assert!(high > low);
    }

    #[test]
    fn salience_stays_in_unit_range() {
        let score = compute_salience(1.0, 100, 100, 100, 100, &recent(), 30.0);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn salience_bad_timestamp_uses_neutral_recency() {
        let score = compute_salience(0.0, 0, 0, 0, 0, "not a date", 30.0);
        assert!((score - W_RECENCY * 0.5).abs() < 1e-9);
    }

    // ── RRF ────────────────────────────────────────────────────

    #[test]
    fn rrf_double_listed_chunk_wins() {
        let v = vec![
            (Scope::Global, record("both", 0.9)),
            (Scope::Global, record("vec-only", 0.8)),
        ];
        let f = vec![
            (Scope::Global, record("fts-only", 0.7)),
            (Scope::Global, record("both", 0.6)),
        ];
        let merged = rrf_merge(&v, &f);
        assert_eq!(merged[0].record.id, "both");
        // Semantic signal comes from the vector leg.
        assert_eq!(merged[0].semantic, 0.9);
        let fts_only = merged.iter().find(|m| m.record.id == "fts-only").unwrap();
        assert_eq!(fts_only.semantic, 0.0);
    }

    #[test]
    fn rrf_uses_zero_based_ranks() {
        let v = vec![(Scope::Global, record("a", 1.0))];
        let merged = rrf_merge(&v, &[]);
        assert!((merged[0].rrf - 1.0 / 61.0).abs() < 1e-12);
    }

    // ── Filters ────────────────────────────────────────────────

    #[test]
    fn scope_filter_parse() {
        assert_eq!(ScopeFilter::parse("journal"), Some(ScopeFilter::Journal));
        assert_eq!(ScopeFilter::parse("GLOBAL"), Some(ScopeFilter::Global));
        assert_eq!(ScopeFilter::parse(""), None);
        assert_eq!(ScopeFilter::parse("nonsense"), None);
    }

    #[test]
    fn timeline_patterns_match() {
        assert!(TIMELINE_PATTERNS.iter().any(|re| re.is_match("最近做了什么")));
        assert!(TIMELINE_PATTERNS.iter().any(|re| re.is_match("what happened yesterday")));
        assert!(TIMELINE_PATTERNS.iter().any(|re| re.is_match("past 3 days progress")));
        assert!(!TIMELINE_PATTERNS.iter().any(|re| re.is_match("postgres decision")));
    }
}
