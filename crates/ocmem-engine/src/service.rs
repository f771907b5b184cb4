//! `MemoryService`: the dual-scope engine façade.
//!
//! Owns one store (plus one exclusive lock) per scope. The two locks are
//! independent and are never both held by one operation — there is no
//! protocol that needs both at once.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use ocmem_config::MemoryConfig;
use ocmem_core::{MemoryError, MemoryKind, Result, Scope, WriteOutcome};
use ocmem_embeddings::EmbeddingProvider;

use crate::indexer::{self, IndexReport};
use crate::primer::{
    self, write_observation, write_primer, write_session_journal, write_tasks, Observation,
    SessionSummary, TaskEntry,
};
use crate::privacy::PrivacyFilter;
use crate::retriever::{self, ScopeFilter, SearchResponse};
use crate::store::{StoreStats, VectorStore};
use crate::watcher::{ScopeWatcher, WatchEvent};
use crate::writer;

/// One scope's root directory, store, and exclusive lock.
pub struct ScopeHandle {
    pub scope: Scope,
    pub root: PathBuf,
    pub store: VectorStore,
    /// Held for the whole of any find-similar→mutate or delete→upsert
    /// sequence (see the writer and the watcher loop).
    pub lock: Mutex<()>,
}

impl ScopeHandle {
    fn open(scope: Scope, root: PathBuf, db_path: &std::path::Path, dimension: usize) -> Result<Self> {
        let store = VectorStore::open(db_path, dimension)?;
        Ok(Self {
            scope,
            root,
            store,
            lock: Mutex::new(()),
        })
    }
}

/// The memory engine: write pipeline, read pipeline, indexing, watching,
/// and the primer builders, over exactly two scopes.
pub struct MemoryService {
    config: MemoryConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    privacy: PrivacyFilter,
    global: ScopeHandle,
    project: Option<ScopeHandle>,
    watchers: parking_lot::Mutex<Vec<ScopeWatcher>>,
}

impl MemoryService {
    /// Open both scopes' stores and build the service.
    pub fn open(config: MemoryConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        ocmem_config::ensure_directories(&config)?;

        let dimension = embedder.dimension();
        let global = ScopeHandle::open(
            Scope::Global,
            config.global_root.clone(),
            &config.global_index_db(),
            dimension,
        )?;
        let project = match (config.project_memory_dir(), config.project_index_db()) {
            (Some(root), Some(db)) => Some(ScopeHandle::open(Scope::Project, root, &db, dimension)?),
            _ => None,
        };

        info!(
            global = %config.global_root.display(),
            project = ?config.project_memory_dir(),
            provider = embedder.name(),
            dimension,
            "memory service ready"
        );

        let privacy = PrivacyFilter::new(&config.privacy.patterns, config.privacy.enabled);
        Ok(Self {
            config,
            embedder,
            privacy,
            global,
            project,
            watchers: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn global_scope(&self) -> &ScopeHandle {
        &self.global
    }

    pub fn project_scope(&self) -> Option<&ScopeHandle> {
        self.project.as_ref()
    }

    fn scope(&self, scope: Scope) -> Option<&ScopeHandle> {
        match scope {
            Scope::Global => Some(&self.global),
            Scope::Project => self.project.as_ref(),
        }
    }

    // ── Verb operations ─────────────────────────────────────────

    /// Write pipeline (§ writer). The unrecognized-hint case falls back to
    /// content routing.
    pub async fn log(&self, content: &str, type_hint: Option<&str>) -> Result<WriteOutcome> {
        let hint = type_hint.and_then(MemoryKind::parse);
        writer::smart_write(
            &self.global,
            self.project.as_ref(),
            self.embedder.as_ref(),
            &self.privacy,
            content,
            hint,
        )
        .await
    }

    /// Read pipeline. An unknown scope string is treated as no filter.
    pub async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        max_tokens: Option<usize>,
    ) -> Result<SearchResponse> {
        let filter = match scope {
            Some(s) if !s.is_empty() => {
                let parsed = ScopeFilter::parse(s);
                if parsed.is_none() {
                    warn!(scope = s, "unknown scope filter ignored");
                }
                parsed
            }
            _ => None,
        };
        retriever::search(
            &self.global,
            self.project.as_ref(),
            self.embedder.as_ref(),
            &self.config.search,
            query,
            filter,
            max_tokens,
        )
        .await
    }

    /// The `primer` verb: instructions plus assembled context.
    pub fn primer(&self) -> String {
        primer::render_primer_reply(
            &self.config.global_root,
            self.config.project_memory_dir().as_deref(),
            &self.config.project.name,
            &self.config.project.description,
        )
    }

    /// The `session_end` verb. Returns the journal file name.
    pub async fn session_end(&self, summary: SessionSummary) -> Result<String> {
        let project = self
            .project
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound("no project scope detected".into()))?;

        let next_steps = summary.next_steps.clone().into_vec();

        let journal_path = write_session_journal(&project.root, summary)?;

        if !next_steps.is_empty() {
            let tasks: Vec<TaskEntry> = next_steps
                .into_iter()
                .map(|title| TaskEntry {
                    title,
                    status: "pending".into(),
                    ..Default::default()
                })
                .collect();
            write_tasks(&project.root, &tasks)?;
        }
        self.refresh_primer()?;

        // The journal changed; fold it into the index before returning so a
        // follow-up search observes this session.
        {
            let _guard = project.lock.lock().await;
            indexer::index_file(
                &project.store,
                self.embedder.as_ref(),
                &project.root,
                &journal_path,
            )
            .await?;
        }

        Ok(journal_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    /// The `update_tasks` verb. Returns the number of tasks written.
    pub fn update_tasks(&self, tasks: Vec<TaskEntry>) -> Result<usize> {
        let project = self
            .project
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound("no project scope detected".into()))?;
        write_tasks(&project.root, &tasks)?;
        self.refresh_primer()?;
        Ok(tasks.len())
    }

    /// The `observe` verb: journal block plus optional insight write.
    pub async fn observe(&self, obs: Observation) -> Result<(String, Option<WriteOutcome>)> {
        let project = self
            .project
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound("no project scope detected".into()))?;

        let journal_path = write_observation(&project.root, &obs)?;
        {
            let _guard = project.lock.lock().await;
            indexer::index_file(
                &project.store,
                self.embedder.as_ref(),
                &project.root,
                &journal_path,
            )
            .await?;
        }

        let insight_outcome = if obs.insight.trim().chars().count() >= 15 {
            Some(self.log(obs.insight.trim(), None).await?)
        } else {
            None
        };

        let name = journal_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok((name, insight_outcome))
    }

    /// The `read` verb: project memory first, then global.
    pub fn read_file(&self, rel: &str) -> Result<String> {
        if rel.split('/').any(|part| part == "..") || rel.starts_with('/') {
            return Err(MemoryError::NotFound(rel.to_string()));
        }
        let mut candidates = Vec::new();
        if let Some(dir) = self.config.project_memory_dir() {
            candidates.push(dir.join(rel));
        }
        candidates.push(self.config.global_root.join(rel));

        for path in candidates {
            if path.is_file() {
                return Ok(std::fs::read_to_string(path)?);
            }
        }
        Err(MemoryError::NotFound(rel.to_string()))
    }

    /// Regenerate `PRIMER.md` (derived, never indexed).
    pub fn refresh_primer(&self) -> Result<()> {
        if let Some(dir) = self.config.project_memory_dir() {
            write_primer(
                &self.config.global_root,
                &dir,
                &self.config.project.name,
                &self.config.project.description,
            )?;
        }
        Ok(())
    }

    // ── Indexing and watching ───────────────────────────────────

    /// One-shot full index of both scopes.
    pub async fn index_all(&self) -> Result<Vec<(Scope, IndexReport)>> {
        let mut reports = Vec::new();
        for handle in std::iter::once(&self.global).chain(self.project.as_ref()) {
            let _guard = handle.lock.lock().await;
            let report =
                indexer::index_all(&handle.store, self.embedder.as_ref(), &handle.root).await?;
            info!(scope = %handle.scope, files = report.files, chunks = report.chunks, "scope indexed");
            reports.push((handle.scope, report));
        }
        Ok(reports)
    }

    /// Start the per-scope filesystem watchers and their dispatch tasks.
    pub fn start_watchers(self: &Arc<Self>) -> Result<()> {
        let mut handles = Vec::new();
        for handle in std::iter::once(&self.global).chain(self.project.as_ref()) {
            let (watcher, mut rx) = ScopeWatcher::start(handle.scope, handle.root.clone())?;
            handles.push(watcher);

            let service = Arc::clone(self);
            let scope = handle.scope;
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Err(e) = service.apply_watch_event(&event).await {
                        // Logged and retried on the next event for the file.
                        warn!(%scope, error = %e, "watch event failed");
                    }
                }
            });
        }
        *self.watchers.lock() = handles;
        Ok(())
    }

    async fn apply_watch_event(&self, event: &WatchEvent) -> Result<()> {
        match event {
            WatchEvent::Upsert(scope, path) => {
                let Some(handle) = self.scope(*scope) else {
                    return Ok(());
                };
                let _guard = handle.lock.lock().await;
                indexer::index_file(&handle.store, self.embedder.as_ref(), &handle.root, path)
                    .await?;
            }
            WatchEvent::Remove(scope, path) => {
                let Some(handle) = self.scope(*scope) else {
                    return Ok(());
                };
                let _guard = handle.lock.lock().await;
                let uri = crate::fsio::uri_for(path, &handle.root);
                handle.store.delete_by_uri(&uri)?;
            }
        }
        Ok(())
    }

    /// Store statistics per scope.
    pub fn stats(&self) -> Result<Vec<(Scope, StoreStats)>> {
        let mut out = vec![(Scope::Global, self.global.store.stats()?)];
        if let Some(project) = &self.project {
            out.push((Scope::Project, project.store.stats()?));
        }
        Ok(out)
    }
}
