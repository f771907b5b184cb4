//! Indexer: makes the store converge to the on-disk truth of a scope's
//! Markdown corpus.
//!
//! `index_file` preserves reinforcement and access counters for chunks
//! whose content survived the edit: stale rows (hash no longer produced by
//! chunking the current file) are deleted first, then every current chunk
//! is upserted, which is a no-op counter-wise for unchanged content.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use ocmem_core::{MemoryKind, Result};
use ocmem_embeddings::EmbeddingProvider;

use crate::chunker::chunk_markdown;
use crate::fsio::{parent_dir, uri_for};
use crate::store::{ChunkInsert, VectorStore};

/// Files regenerated by the primer, never indexed.
pub const EXCLUDED_FILES: &[&str] = &["PRIMER.md", "TASKS.md"];

/// Infer a memory kind from the file a chunk lives in.
pub fn kind_from_uri(uri: &str) -> Option<MemoryKind> {
    if uri.contains("preferences") {
        Some(MemoryKind::Preference)
    } else if uri.contains("instructions") {
        Some(MemoryKind::Instruction)
    } else if uri.contains("entities") {
        Some(MemoryKind::Entity)
    } else if uri.contains("decisions") {
        Some(MemoryKind::Decision)
    } else if uri.contains("patterns") {
        Some(MemoryKind::Pattern)
    } else if uri.starts_with("journal/") {
        Some(MemoryKind::Journal)
    } else {
        None
    }
}

/// Recursively collect tracked Markdown files under `root`: hidden
/// directories, non-`.md` files, and the derived files are skipped.
pub fn scan_markdown_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_markdown(root, &mut files);
    files.sort();
    files
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_markdown(&path, out);
        } else if path.extension().is_some_and(|e| e == "md")
            && !EXCLUDED_FILES.contains(&name.as_ref())
        {
            out.push(path);
        }
    }
}

/// Index one Markdown file. A missing file is equivalent to deleting its
/// chunks. Returns the number of chunks upserted.
pub async fn index_file(
    store: &VectorStore,
    embedder: &dyn EmbeddingProvider,
    root: &Path,
    path: &Path,
) -> Result<usize> {
    let uri = uri_for(path, root);

    if !path.is_file() {
        let removed = store.delete_by_uri(&uri)?;
        debug!(%uri, removed, "file gone, chunks removed");
        return Ok(0);
    }

    let text = std::fs::read_to_string(path)?;
    let chunks = chunk_markdown(&text, &uri);

    let keep: HashSet<String> = chunks.iter().map(|c| c.content_hash.clone()).collect();
    let stale = store.delete_stale(&uri, &keep)?;
    if stale > 0 {
        debug!(%uri, stale, "stale chunks removed");
    }
    if chunks.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = embedder.embed(&texts).await?;

    let parent = parent_dir(&uri).to_string();
    let inferred_kind = kind_from_uri(&uri);

    let mut count = 0usize;
    for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
        // Frontmatter type wins over the path-inferred kind.
        let kind = chunk
            .meta
            .get("type")
            .and_then(MemoryKind::parse)
            .or(inferred_kind)
            .map(|k| k.as_str())
            .unwrap_or("");
        let importance = chunk.meta.get_int("importance").unwrap_or(1);

        let id = chunk.id();
        store.upsert(
            &ChunkInsert {
                id: &id,
                uri: &uri,
                content: &chunk.content,
                content_hash: &chunk.content_hash,
                parent_dir: &parent,
                kind,
                section: &chunk.section,
                importance,
                token_count: chunk.token_count as i64,
            },
            embedding,
        )?;
        count += 1;
    }

    debug!(%uri, count, "file indexed");
    Ok(count)
}

/// Report from a full-scope walk.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files: usize,
    pub chunks: usize,
    pub removed_uris: usize,
}

/// Index every tracked Markdown file under `root` and drop chunks whose
/// source file no longer exists.
pub async fn index_all(
    store: &VectorStore,
    embedder: &dyn EmbeddingProvider,
    root: &Path,
) -> Result<IndexReport> {
    let files = scan_markdown_files(root);
    let existing = store.all_uris()?;

    let mut report = IndexReport::default();
    let mut current: HashSet<String> = HashSet::new();

    for path in &files {
        let uri = uri_for(path, root);
        current.insert(uri);
        report.chunks += index_file(store, embedder, root, path).await?;
        report.files += 1;
    }

    for uri in existing.difference(&current) {
        let removed = store.delete_by_uri(uri)?;
        info!(%uri, removed, "removed chunks for deleted file");
        report.removed_uris += 1;
    }

    Ok(report)
}
