//! End-to-end engine tests: write pipeline branches, retrieval paths,
//! index convergence, and the primer flow, all against temp directories
//! and a deterministic mock embedder.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ocmem_config::MemoryConfig;
use ocmem_core::{MemoryError, WriteOutcome};
use ocmem_embeddings::mock::MockEmbedding;
use ocmem_embeddings::Deadline;
use ocmem_engine::{indexer, MemoryService, SessionSummary, TaskEntry};

const DIMS: usize = 8;

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[i] = 1.0;
    v
}

/// A unit vector with the given cosine similarity to `axis(0)`.
fn near_axis0(similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[0] = similarity;
    v[1] = (1.0 - similarity * similarity).sqrt();
    v
}

struct Fixture {
    _global_dir: tempfile::TempDir,
    _project_dir: tempfile::TempDir,
    mock: Arc<MockEmbedding>,
    service: Arc<MemoryService>,
}

impl Fixture {
    fn global_root(&self) -> &Path {
        &self.service.config().global_root
    }

    fn project_mem(&self) -> std::path::PathBuf {
        self.service.config().project_memory_dir().unwrap()
    }

    fn service_embedder(&self) -> &dyn ocmem_embeddings::EmbeddingProvider {
        self.mock.as_ref()
    }
}

fn fixture(mock: MockEmbedding) -> Fixture {
    let global_dir = tempfile::tempdir().unwrap();
    let project_dir = tempfile::tempdir().unwrap();

    let mut config = MemoryConfig::default();
    config.global_root = global_dir.path().to_path_buf();
    config.project_root = Some(project_dir.path().to_path_buf());

    let mock = Arc::new(mock);
    let embedder = Arc::new(Deadline::new(
        mock.clone() as Arc<dyn ocmem_embeddings::EmbeddingProvider>,
        Duration::from_secs(5),
    ));
    let service = Arc::new(MemoryService::open(config, embedder).unwrap());
    Fixture {
        _global_dir: global_dir,
        _project_dir: project_dir,
        mock,
        service,
    }
}

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn bullets_of(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| l.trim_start().starts_with("- "))
        .map(|l| l.trim().to_string())
        .collect()
}

// ── Write pipeline scenarios ────────────────────────────────────

#[tokio::test]
async fn reinforcement_on_near_duplicate() {
    let existing = "- 用户偏好使用 FastAPI 而不是 Flask 作为后端框架";
    let note = "用户偏好 FastAPI 而非 Flask";

    let fx = fixture(
        MockEmbedding::new(DIMS)
            .with_vector(existing, axis(0))
            .with_vector(note, near_axis0(0.95)),
    );

    let prefs = fx.global_root().join("user/preferences.md");
    write_file(&prefs, &format!("---\ntype: preference\nreinforcement: 0\n---\n{existing}\n"));
    fx.service.index_all().await.unwrap();

    let outcome = fx.service.log(note, None).await.unwrap();
    match &outcome {
        WriteOutcome::Reinforced { path, score } => {
            assert_eq!(path, "user/preferences.md");
            assert!((score - 0.95).abs() < 0.01, "score was {score}");
        }
        other => panic!("expected Reinforced, got {other:?}"),
    }
    assert!(outcome.reply().starts_with("Existing memory reinforced (score=0.95)"));

    // Frontmatter counter bumped, no new bullet appended.
    let text = std::fs::read_to_string(&prefs).unwrap();
    assert!(text.contains("reinforcement: 1"));
    assert_eq!(bullets_of(&prefs).len(), 1);

    // The store counter moved too.
    let chunks = fx
        .service
        .global_scope()
        .store
        .chunks_for_uri("user/preferences.md")
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].reinforcement, 1);
}

#[tokio::test]
async fn conflict_replaces_bullet_in_place() {
    let existing = "- 决定使用 PostgreSQL 作为数据库，SQLAlchemy 2.0 作为 ORM";
    let note = "决定将 ORM 从 SQLAlchemy 2.0 更换为 Tortoise ORM";

    let fx = fixture(
        MockEmbedding::new(DIMS)
            .with_vector(existing, axis(0))
            .with_vector(note, near_axis0(0.88)),
    );

    let decisions = fx.project_mem().join("agent/decisions.md");
    write_file(&decisions, &format!("---\ntype: decision\n---\n{existing}\n"));
    fx.service.index_all().await.unwrap();

    let outcome = fx.service.log(note, None).await.unwrap();
    match &outcome {
        WriteOutcome::ConflictUpdated { path, score } => {
            assert_eq!(path, "agent/decisions.md");
            assert!((score - 0.88).abs() < 0.01);
        }
        other => panic!("expected ConflictUpdated, got {other:?}"),
    }
    assert!(outcome.reply().starts_with("Conflicting memory updated (score=0.88)"));

    // The old bullet was replaced in place: still exactly one ORM bullet.
    let bullets = bullets_of(&decisions);
    assert_eq!(bullets.len(), 1);
    assert!(bullets[0].contains("Tortoise ORM"));
    assert!(!bullets[0].contains("PostgreSQL"));
}

#[tokio::test]
async fn appends_novel_memory_and_makes_it_searchable() {
    let note = "决定采用 Redis 作为缓存层来提升查询性能";
    let fx = fixture(MockEmbedding::new(DIMS).with_vector(note, axis(2)));

    let outcome = fx.service.log(note, None).await.unwrap();
    match &outcome {
        WriteOutcome::Appended { path, .. } => assert_eq!(path, "agent/decisions.md"),
        other => panic!("expected Appended, got {other:?}"),
    }

    // After log() returns, a search from the same caller observes the write.
    let response = fx.service.search("Redis 缓存层", None, None).await.unwrap();
    assert!(response
        .results
        .iter()
        .any(|r| r.content.contains("Redis")));
}

#[tokio::test]
async fn quality_rejection_mutates_nothing() {
    let fx = fixture(MockEmbedding::new(DIMS));

    let outcome = fx.service.log("好的", None).await.unwrap();
    assert_eq!(outcome.reply(), "Rejected: too short");

    // Nothing was embedded, nothing was written.
    assert!(fx.mock.requests.lock().unwrap().is_empty());
    assert!(bullets_of(&fx.project_mem().join("agent/decisions.md")).is_empty());
}

#[tokio::test]
async fn privacy_rejection_mutates_nothing() {
    let fx = fixture(MockEmbedding::new(DIMS));

    let outcome = fx
        .service
        .log("使用 OpenAI API，key 是 sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ012345", None)
        .await
        .unwrap();
    assert_eq!(outcome.reply(), "Rejected: contains sensitive information");
    assert!(fx.mock.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn explicit_type_hint_overrides_routing() {
    let note = "the cache invalidation strategy relies on versioned keys everywhere";
    let fx = fixture(MockEmbedding::new(DIMS));

    let outcome = fx.service.log(note, Some("pattern")).await.unwrap();
    match outcome {
        WriteOutcome::Appended { path, .. } => assert_eq!(path, "agent/patterns.md"),
        other => panic!("expected Appended, got {other:?}"),
    }
}

#[tokio::test]
async fn embedding_outage_fails_log_without_fallback() {
    let fx = fixture(MockEmbedding::new(DIMS));
    fx.mock.set_failure(Some("provider down"));

    let err = fx
        .service
        .log("决定采用事件溯源架构重构订单系统", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)));
}

// ── Retrieval scenarios ─────────────────────────────────────────

#[tokio::test]
async fn fast_path_returns_whole_file_without_counter_bumps() {
    let fx = fixture(MockEmbedding::new(DIMS));
    let prefs = fx.global_root().join("user/preferences.md");
    write_file(
        &prefs,
        "---\ntype: preference\n---\n- 偏好使用 pytest 而不是 unittest\n- 偏好函数式风格\n",
    );
    fx.service.index_all().await.unwrap();

    let response = fx.service.search("我的偏好是什么", None, None).await.unwrap();
    assert!(response.fast_path);
    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].content.contains("pytest"));
    assert!(response.results[0].content.contains("函数式"));
    assert_eq!(response.total_tokens, response.results[0].token_count);

    // The fast path bypasses the index: access counters untouched.
    let chunks = fx
        .service
        .global_scope()
        .store
        .chunks_for_uri("user/preferences.md")
        .unwrap();
    assert!(chunks.iter().all(|c| c.access_count == 0));
}

#[tokio::test]
async fn timeline_path_reads_journals_newest_first() {
    let fx = fixture(MockEmbedding::new(DIMS));
    let journal = fx.project_mem().join("journal");
    write_file(&journal.join("2026-07-30.md"), "- older session notes here\n");
    write_file(&journal.join("2026-08-01.md"), "- newer session notes here\n");

    let response = fx.service.search("最近做了什么", None, None).await.unwrap();
    assert!(response.fast_path);
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].uri, "journal/2026-08-01.md");
    assert_eq!(response.results[1].uri, "journal/2026-07-30.md");

    // The journal scope filter takes the same path.
    let response = fx.service.search("anything", Some("journal"), None).await.unwrap();
    assert!(response.fast_path);
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn budget_cuts_at_first_overflowing_chunk() {
    let query = "q budget probe";
    let fx = fixture(MockEmbedding::new(DIMS).with_vector(query, axis(0)));

    // Ten 400-token chunks, all equally similar to the query.
    let store = &fx.service.global_scope().store;
    for i in 0..10 {
        let content = format!("- budget filler chunk number {i}");
        store
            .upsert(
                &ocmem_engine::store::ChunkInsert {
                    id: &format!("budget-chunk-{i:02}"),
                    uri: "user/preferences.md",
                    content: &content,
                    content_hash: &format!("hash-{i:02}"),
                    parent_dir: "user",
                    kind: "preference",
                    section: "",
                    importance: 3,
                    token_count: 400,
                },
                &axis(0),
            )
            .unwrap();
    }

    let response = fx.service.search(query, None, Some(1500)).await.unwrap();
    assert_eq!(response.results.len(), 3);
    assert_eq!(response.total_tokens, 1200);
    assert_eq!(response.budget_remaining, 300);

    // Property: sum of accepted token counts never exceeds the budget.
    assert!(response.total_tokens <= 1500);
    // Property: sorted by salience descending.
    for pair in response.results.windows(2) {
        assert!(pair[0].salience >= pair[1].salience);
    }

    // Stage-3 results bump access counters (batched).
    let chunks = store.chunks_for_uri("user/preferences.md").unwrap();
    assert_eq!(chunks.iter().filter(|c| c.access_count == 1).count(), 3);
}

#[tokio::test]
async fn search_degrades_to_fts_only_when_embedding_fails() {
    let note = "- the payment gateway retries idempotently on timeout";
    let fx = fixture(MockEmbedding::new(DIMS).with_vector(note, axis(3)));

    let patterns = fx.project_mem().join("agent/patterns.md");
    write_file(&patterns, &format!("---\ntype: pattern\n---\n{note}\n"));
    fx.service.index_all().await.unwrap();

    fx.mock.set_failure(Some("provider down"));
    let response = fx
        .service
        .search("payment gateway retries", None, None)
        .await
        .unwrap();
    assert!(response.partial);
    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].content.contains("idempotently"));
    assert_eq!(response.results[0].semantic, 0.0);
}

#[tokio::test]
async fn scope_filter_restricts_to_parent_dir() {
    let user_note = "- user scoped preference entry";
    let agent_note = "- agent scoped decision entry";
    let query = "scoped entry probe";
    let fx = fixture(
        MockEmbedding::new(DIMS)
            .with_vector(user_note, axis(0))
            .with_vector(agent_note, axis(0))
            .with_vector(query, axis(0)),
    );

    write_file(
        &fx.global_root().join("user/preferences.md"),
        &format!("---\ntype: preference\n---\n{user_note}\n"),
    );
    write_file(
        &fx.project_mem().join("agent/decisions.md"),
        &format!("---\ntype: decision\n---\n{agent_note}\n"),
    );
    fx.service.index_all().await.unwrap();

    let response = fx.service.search(query, Some("user"), None).await.unwrap();
    assert!(response.results.iter().all(|r| r.uri.starts_with("user/")));
    assert!(!response.results.is_empty());

    let response = fx.service.search(query, Some("agent"), None).await.unwrap();
    assert!(response.results.iter().all(|r| r.uri.starts_with("agent/")));
    assert!(!response.results.is_empty());
}

// ── Index convergence ───────────────────────────────────────────

#[tokio::test]
async fn reindex_converges_to_current_file_contents() {
    let fx = fixture(MockEmbedding::new(DIMS));
    let handle = fx.service.global_scope();
    let path = fx.global_root().join("user/preferences.md");

    write_file(&path, "---\ntype: preference\n---\n- first version bullet\n");
    indexer::index_file(&handle.store, fx.service_embedder(), &handle.root, &path)
        .await
        .unwrap();

    // Off-band edit, then re-index: the store matches the new contents,
    // and nothing from the old version survives.
    write_file(&path, "---\ntype: preference\n---\n- second version bullet\n");
    indexer::index_file(&handle.store, fx.service_embedder(), &handle.root, &path)
        .await
        .unwrap();

    let chunks = handle.store.chunks_for_uri("user/preferences.md").unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains("second version"));

    // Deleting the file removes its chunks.
    std::fs::remove_file(&path).unwrap();
    indexer::index_file(&handle.store, fx.service_embedder(), &handle.root, &path)
        .await
        .unwrap();
    assert!(handle.store.chunks_for_uri("user/preferences.md").unwrap().is_empty());
}

#[tokio::test]
async fn reindex_preserves_counters_for_unchanged_chunks() {
    let fx = fixture(MockEmbedding::new(DIMS));
    let handle = fx.service.global_scope();
    let path = fx.global_root().join("user/preferences.md");

    write_file(&path, "---\ntype: preference\n---\n- stable bullet content\n");
    indexer::index_file(&handle.store, fx.service_embedder(), &handle.root, &path)
        .await
        .unwrap();
    let id = handle.store.chunks_for_uri("user/preferences.md").unwrap()[0].id.clone();
    handle.store.increment_reinforcement(&id).unwrap();

    // Touch the file (appending leaves the first chunk's content alone
    // only if it stays its own section; rewrite identical content instead).
    write_file(&path, "---\ntype: preference\n---\n- stable bullet content\n");
    indexer::index_file(&handle.store, fx.service_embedder(), &handle.root, &path)
        .await
        .unwrap();

    let chunks = handle.store.chunks_for_uri("user/preferences.md").unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].reinforcement, 1);
}

// ── Primer / session flow ───────────────────────────────────────

#[tokio::test]
async fn session_end_writes_journal_tasks_and_primer() {
    let fx = fixture(MockEmbedding::new(DIMS));
    write_file(
        &fx.global_root().join("user/instructions.md"),
        "---\ntype: instruction\n---\n- Always run the linter\n",
    );

    let summary = SessionSummary {
        request: "Wire up webhook handling".into(),
        learned: ocmem_engine::primer::StringOrList::Many(vec![
            "Stripe requires signature verification".into(),
        ]),
        completed: ocmem_engine::primer::StringOrList::One("Implemented verification".into()),
        next_steps: ocmem_engine::primer::StringOrList::One("Handle failed events".into()),
    };
    let journal_name = fx.service.session_end(summary).await.unwrap();
    assert!(journal_name.ends_with(".md"));

    let mem = fx.project_mem();
    let journal_text =
        std::fs::read_to_string(mem.join("journal").join(&journal_name)).unwrap();
    assert!(journal_text.contains("Wire up webhook handling"));
    assert!(journal_text.contains("### Completed"));

    let tasks_text = std::fs::read_to_string(mem.join("TASKS.md")).unwrap();
    assert!(tasks_text.contains("- [ ] Handle failed events"));

    let primer_text = std::fs::read_to_string(mem.join("PRIMER.md")).unwrap();
    assert!(primer_text.contains("## Active Tasks"));
    assert!(primer_text.contains("Handle failed events"));

    // The journal was folded into the index synchronously.
    let chunks = fx
        .service
        .project_scope()
        .unwrap()
        .store
        .chunks_for_uri(&format!("journal/{journal_name}"))
        .unwrap();
    assert!(!chunks.is_empty());

    // The primer verb surfaces instructions and the fresh context.
    let primer = fx.service.primer();
    assert!(primer.starts_with("# Instructions"));
    assert!(primer.contains("Always run the linter"));
    assert!(primer.contains("Handle failed events"));
}

#[tokio::test]
async fn update_tasks_rewrites_tasks_and_primer() {
    let fx = fixture(MockEmbedding::new(DIMS));
    let count = fx
        .service
        .update_tasks(vec![
            TaskEntry {
                title: "Implement auth".into(),
                status: "done".into(),
                ..Default::default()
            },
            TaskEntry {
                title: "Add tests".into(),
                status: "pending".into(),
                ..Default::default()
            },
        ])
        .unwrap();
    assert_eq!(count, 2);

    let mem = fx.project_mem();
    let tasks_text = std::fs::read_to_string(mem.join("TASKS.md")).unwrap();
    assert!(tasks_text.contains("- [x] Implement auth"));
    assert!(mem.join("PRIMER.md").is_file());

    // Derived files never enter the index.
    fx.service.index_all().await.unwrap();
    let store = &fx.service.project_scope().unwrap().store;
    assert!(store.chunks_for_uri("TASKS.md").unwrap().is_empty());
    assert!(store.chunks_for_uri("PRIMER.md").unwrap().is_empty());
}

#[tokio::test]
async fn read_verb_resolves_project_then_global() {
    let fx = fixture(MockEmbedding::new(DIMS));
    write_file(&fx.global_root().join("user/entities.md"), "---\ntype: entity\n---\n- Alice\n");
    write_file(&fx.project_mem().join("agent/patterns.md"), "---\ntype: pattern\n---\n- retry\n");

    let text = fx.service.read_file("agent/patterns.md").unwrap();
    assert!(text.contains("retry"));
    let text = fx.service.read_file("user/entities.md").unwrap();
    assert!(text.contains("Alice"));

    let err = fx.service.read_file("nope.md").unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));
    let err = fx.service.read_file("../escape.md").unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));
}
