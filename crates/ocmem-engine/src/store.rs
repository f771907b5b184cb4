//! Per-scope vector store: a content-addressed chunks table in SQLite,
//! augmented by a sqlite-vec ANN index and an FTS5 full-text index.
//!
//! The Markdown files are the source of truth; everything here is a derived
//! cache and can be rebuilt from them. The FTS table uses the
//! external-content pattern, so every chunk mutation carries its matching
//! FTS mutation in the same transaction — letting them drift corrupts
//! search results silently, hence the transactional pairing throughout.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Once;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use tracing::debug;

use ocmem_core::{MemoryError, Result};

/// Register sqlite-vec as an auto-extension, loaded on every new connection.
/// Goes through `sqlite3_auto_extension`, which does not require
/// SQLITE_ENABLE_LOAD_EXTENSION.
fn register_sqlite_vec() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *const std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    });
}

/// Deterministic TEXT→i64 mapping for vec0 rowids (vec0 tables have no
/// text primary keys; shifted right to stay positive).
fn vec_rowid(chunk_id: &str) -> i64 {
    let digest = hex::encode(Sha256::digest(chunk_id.as_bytes()));
    let n = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    (n >> 1) as i64
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn storage_err(e: rusqlite::Error) -> MemoryError {
    MemoryError::Storage(e.to_string())
}

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Build an FTS5 query from raw text: alphanumeric tokens, quoted, AND-joined.
fn build_fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(" AND "))
}

// ── Records ─────────────────────────────────────────────────────

/// Fields the indexer supplies on upsert. Counters and timestamps are
/// store-managed.
#[derive(Debug)]
pub struct ChunkInsert<'a> {
    pub id: &'a str,
    pub uri: &'a str,
    pub content: &'a str,
    pub content_hash: &'a str,
    pub parent_dir: &'a str,
    pub kind: &'a str,
    pub section: &'a str,
    pub importance: i64,
    pub token_count: i64,
}

/// A stored chunk, as read back from the store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub uri: String,
    pub content: String,
    pub content_hash: String,
    pub parent_dir: String,
    pub kind: String,
    pub section: String,
    pub importance: i64,
    pub reinforcement: i64,
    pub access_count: i64,
    pub token_count: i64,
    pub created_at: String,
    pub updated_at: String,
    /// Populated during search: similarity or normalized FTS relevance.
    pub score: f32,
}

const CHUNK_COLUMNS: &str = "id, uri, content, content_hash, parent_dir, type, section, \
     importance, reinforcement, access_count, token_count, created_at, updated_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(0)?,
        uri: row.get(1)?,
        content: row.get(2)?,
        content_hash: row.get(3)?,
        parent_dir: row.get(4)?,
        kind: row.get(5)?,
        section: row.get(6)?,
        importance: row.get(7)?,
        reinforcement: row.get(8)?,
        access_count: row.get(9)?,
        token_count: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        score: 0.0,
    })
}

/// Per-kind slice of the store statistics.
#[derive(Debug, Clone, Default)]
pub struct KindStats {
    pub chunks: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_chunks: i64,
    pub total_files: i64,
    pub total_tokens: i64,
    pub by_kind: Vec<(String, KindStats)>,
}

// ── Store ───────────────────────────────────────────────────────

/// SQLite-backed chunk store for one scope.
pub struct VectorStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl VectorStore {
    /// Open (or create) the index database at `path`.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        register_sqlite_vec();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::init(conn, dimension)
    }

    /// In-memory store, for tests.
    pub fn in_memory(dimension: usize) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> Result<Self> {
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .unwrap_or_else(|_| "memory".into());
        conn.execute_batch("PRAGMA synchronous=NORMAL;")
            .map_err(storage_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                uri TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                parent_dir TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT '',
                section TEXT NOT NULL DEFAULT '',
                importance INTEGER NOT NULL DEFAULT 1,
                reinforcement INTEGER NOT NULL DEFAULT 0,
                access_count INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_uri ON chunks(uri);
            CREATE INDEX IF NOT EXISTS idx_chunks_parent_dir ON chunks(parent_dir);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash);
            CREATE INDEX IF NOT EXISTS idx_chunks_type ON chunks(type);",
        )
        .map_err(storage_err)?;

        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0(
                embedding float[{dimension}] distance_metric=cosine,
                +chunk_id text
            );"
        ))
        .map_err(|e| {
            MemoryError::Storage(format!(
                "sqlite-vec unavailable or schema mismatch: {e}"
            ))
        })?;

        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content, uri, section,
                content=chunks,
                content_rowid=rowid
            );",
        )
        .map_err(storage_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // ── Write operations ────────────────────────────────────────

    /// Insert a chunk, or update the existing chunk with the same
    /// `content_hash`. On update the row keeps its id, counters, and
    /// `created_at`; mutable fields and the vector are replaced.
    pub fn upsert(&self, chunk: &ChunkInsert<'_>, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::Storage(format!(
                "embedding dimension {} does not match index dimension {}",
                embedding.len(),
                self.dimension
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        upsert_tx(&tx, chunk, embedding).map_err(storage_err)?;
        tx.commit().map_err(storage_err)
    }

    /// Remove all chunks for a source path. Returns the count removed.
    /// Idempotent: a second call returns 0.
    pub fn delete_by_uri(&self, uri: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let removed = delete_where_tx(&tx, uri, None).map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        if removed > 0 {
            debug!(uri, removed, "chunks deleted");
        }
        Ok(removed)
    }

    /// Remove chunks of `uri` whose `content_hash` is not in `keep`.
    /// Chunks that survive keep their counters — this is what preserves
    /// reinforcement across re-indexes.
    pub fn delete_stale(&self, uri: &str, keep: &HashSet<String>) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let removed = delete_where_tx(&tx, uri, Some(keep)).map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(removed)
    }

    /// Bump a chunk's reinforcement counter. Returns the new value.
    pub fn increment_reinforcement(&self, id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE chunks SET reinforcement = reinforcement + 1, updated_at = ?1 WHERE id = ?2",
                params![now_iso(), id],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!("chunk {id}")));
        }
        conn.query_row(
            "SELECT reinforcement FROM chunks WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .map_err(storage_err)
    }

    /// Bump access counters for a batch of retrieved chunks.
    pub fn increment_access_counts(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let now = now_iso();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE chunks SET access_count = access_count + 1, updated_at = ?1 \
             WHERE id IN ({placeholders})"
        );
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
        sql_params.push(&now);
        for id in ids {
            sql_params.push(id);
        }
        conn.execute(&sql, sql_params.as_slice()).map_err(storage_err)?;
        Ok(())
    }

    // ── Search operations ───────────────────────────────────────

    /// KNN cosine search. `score` on the returned records is the
    /// similarity (`1 − distance`), descending.
    pub fn vector_search(
        &self,
        query: &[f32],
        top_k: usize,
        parent_dir: Option<&str>,
    ) -> Result<Vec<ChunkRecord>> {
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();

        // Over-fetch so a parent_dir filter still fills top_k.
        let knn: Vec<(String, f64)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT chunk_id, distance FROM chunks_vec \
                     WHERE embedding MATCH ?1 AND k = ?2",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![vec_to_blob(query), (top_k * 3) as i64], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
                })
                .map_err(storage_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)?
        };
        if knn.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = knn.iter().map(|(id, _)| id.as_str()).collect();
        let distances: std::collections::HashMap<&str, f64> =
            knn.iter().map(|(id, d)| (id.as_str(), *d)).collect();

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let mut sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id IN ({placeholders})");
        let mut sql_params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let like;
        if let Some(pd) = parent_dir {
            sql.push_str(" AND parent_dir LIKE ?");
            like = format!("{pd}%");
            sql_params.push(&like);
        }

        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(sql_params.as_slice(), row_to_record)
            .map_err(storage_err)?;
        let mut results: Vec<ChunkRecord> = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        for record in &mut results {
            let dist = *distances.get(record.id.as_str()).unwrap_or(&1.0);
            record.score = if dist <= 1.0 {
                (1.0 - dist) as f32
            } else {
                (1.0 / (1.0 + dist)) as f32
            };
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// BM25 full-text search. `score` is the rank normalized into 0..1,
    /// descending.
    pub fn fts_search(
        &self,
        query: &str,
        top_k: usize,
        parent_dir: Option<&str>,
    ) -> Result<Vec<ChunkRecord>> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock();

        let mut sql = format!(
            "SELECT {}, bm25(chunks_fts) AS rank \
             FROM chunks_fts \
             JOIN chunks c ON c.rowid = chunks_fts.rowid \
             WHERE chunks_fts MATCH ?1",
            CHUNK_COLUMNS
                .split(", ")
                .map(|c| format!("c.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let like;
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&fts_query];
        if let Some(pd) = parent_dir {
            sql.push_str(" AND c.parent_dir LIKE ?2");
            like = format!("{pd}%");
            sql_params.push(&like);
        }
        sql.push_str(" ORDER BY rank LIMIT ");
        sql.push_str(&top_k.to_string());

        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(sql_params.as_slice(), |row| {
                let mut record = row_to_record(row)?;
                // bm25() is negative, lower = better.
                let rank: f64 = row.get(13)?;
                record.score = ((-rank / 20.0).clamp(0.0, 1.0)) as f32;
                Ok(record)
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// Nearest chunks with similarity at or above `threshold`, used for
    /// dedup and conflict detection.
    pub fn find_similar(
        &self,
        query: &[f32],
        threshold: f32,
        parent_dir: Option<&str>,
    ) -> Result<Vec<ChunkRecord>> {
        let mut results = self.vector_search(query, 5, parent_dir)?;
        results.retain(|r| r.score >= threshold);
        Ok(results)
    }

    // ── Lookups ─────────────────────────────────────────────────

    pub fn get_by_id(&self, id: &str) -> Result<Option<ChunkRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(storage_err)
    }

    /// All chunks for one source path, in insertion order.
    pub fn chunks_for_uri(&self, uri: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks WHERE uri = ?1 ORDER BY rowid"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![uri], row_to_record)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// All distinct source paths currently indexed.
    pub fn all_uris(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT uri FROM chunks")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<HashSet<_>>>().map_err(storage_err)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let (total_chunks, total_files, total_tokens) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT uri), COALESCE(SUM(token_count), 0) FROM chunks",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .map_err(storage_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT type, COUNT(*), COALESCE(SUM(token_count), 0) \
                 FROM chunks GROUP BY type ORDER BY type",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    KindStats {
                        chunks: r.get(1)?,
                        tokens: r.get(2)?,
                    },
                ))
            })
            .map_err(storage_err)?;
        let by_kind = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;

        Ok(StoreStats {
            total_chunks,
            total_files,
            total_tokens,
            by_kind,
        })
    }
}

// ── Transaction bodies ──────────────────────────────────────────

fn fts_delete(tx: &Transaction<'_>, rowid: i64, content: &str, uri: &str, section: &str) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO chunks_fts(chunks_fts, rowid, content, uri, section) \
         VALUES('delete', ?1, ?2, ?3, ?4)",
        params![rowid, content, uri, section],
    )?;
    Ok(())
}

fn fts_insert(tx: &Transaction<'_>, rowid: i64, content: &str, uri: &str, section: &str) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO chunks_fts(rowid, content, uri, section) VALUES(?1, ?2, ?3, ?4)",
        params![rowid, content, uri, section],
    )?;
    Ok(())
}

/// vec0 tables support neither ON CONFLICT nor in-place updates: always
/// delete-then-insert under the surrounding transaction.
fn vec_replace(tx: &Transaction<'_>, chunk_id: &str, embedding: &[f32]) -> rusqlite::Result<()> {
    let rowid = vec_rowid(chunk_id);
    tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![rowid])?;
    tx.execute(
        "INSERT INTO chunks_vec(rowid, embedding, chunk_id) VALUES (?1, ?2, ?3)",
        params![rowid, vec_to_blob(embedding), chunk_id],
    )?;
    Ok(())
}

fn upsert_tx(tx: &Transaction<'_>, chunk: &ChunkInsert<'_>, embedding: &[f32]) -> rusqlite::Result<()> {
    let now = now_iso();
    let existing: Option<(String, i64, String, String, String)> = tx
        .query_row(
            "SELECT id, rowid, content, uri, section FROM chunks WHERE content_hash = ?1",
            params![chunk.content_hash],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()?;

    match existing {
        Some((id, rowid, old_content, old_uri, old_section)) => {
            fts_delete(tx, rowid, &old_content, &old_uri, &old_section)?;
            tx.execute(
                "UPDATE chunks SET uri = ?1, parent_dir = ?2, type = ?3, section = ?4, \
                 importance = ?5, token_count = ?6, updated_at = ?7 WHERE id = ?8",
                params![
                    chunk.uri,
                    chunk.parent_dir,
                    chunk.kind,
                    chunk.section,
                    chunk.importance,
                    chunk.token_count,
                    now,
                    id,
                ],
            )?;
            // content_hash matched, so the content is byte-identical.
            fts_insert(tx, rowid, chunk.content, chunk.uri, chunk.section)?;
            vec_replace(tx, &id, embedding)?;
        }
        None => {
            tx.execute(
                "INSERT INTO chunks (id, uri, content, content_hash, parent_dir, type, \
                 section, importance, reinforcement, access_count, token_count, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10, ?10)",
                params![
                    chunk.id,
                    chunk.uri,
                    chunk.content,
                    chunk.content_hash,
                    chunk.parent_dir,
                    chunk.kind,
                    chunk.section,
                    chunk.importance,
                    chunk.token_count,
                    now,
                ],
            )?;
            let rowid = tx.last_insert_rowid();
            fts_insert(tx, rowid, chunk.content, chunk.uri, chunk.section)?;
            vec_replace(tx, chunk.id, embedding)?;
        }
    }
    Ok(())
}

/// Delete chunks of `uri`; when `keep` is given, rows whose hash is in the
/// set survive. Returns the number of rows removed.
fn delete_where_tx(
    tx: &Transaction<'_>,
    uri: &str,
    keep: Option<&HashSet<String>>,
) -> rusqlite::Result<usize> {
    let rows: Vec<(String, i64, String, String, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT id, rowid, content, uri, section, content_hash FROM chunks WHERE uri = ?1",
        )?;
        let mapped = stmt.query_map(params![uri], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })?;
        mapped.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut removed = 0usize;
    for (id, rowid, content, row_uri, section, hash) in rows {
        if keep.is_some_and(|k| k.contains(&hash)) {
            continue;
        }
        fts_delete(tx, rowid, &content, &row_uri, &section)?;
        tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![vec_rowid(&id)])?;
        tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn insert(store: &VectorStore, id: &str, uri: &str, content: &str, parent: &str, vec: Vec<f32>) {
        let hash = crate::chunker::content_hash(content);
        let chunk = ChunkInsert {
            id,
            uri,
            content,
            content_hash: &hash,
            parent_dir: parent,
            kind: "preference",
            section: "",
            importance: 3,
            token_count: crate::chunker::estimate_tokens(content) as i64,
        };
        store.upsert(&chunk, &vec).unwrap();
    }

    #[test]
    fn upsert_and_get_roundtrip() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "aaaa", "user/preferences.md", "- prefers tabs", "user", unit(4, 0));

        let rec = store.get_by_id("aaaa").unwrap().unwrap();
        assert_eq!(rec.uri, "user/preferences.md");
        assert_eq!(rec.kind, "preference");
        assert_eq!(rec.reinforcement, 0);
        assert!(!rec.created_at.is_empty());
    }

    #[test]
    fn upsert_is_idempotent_on_content_hash() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "id-1", "a.md", "- same content", "", unit(4, 0));
        store.increment_reinforcement("id-1").unwrap();

        // Same content re-indexed at a new position gets a new candidate id,
        // but the stored row (and its counters) survive.
        insert(&store, "id-2", "b.md", "- same content", "", unit(4, 1));

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_chunks, 1);
        let rec = store.get_by_id("id-1").unwrap().unwrap();
        assert_eq!(rec.uri, "b.md");
        assert_eq!(rec.reinforcement, 1);
        assert!(store.get_by_id("id-2").unwrap().is_none());
    }

    #[test]
    fn vector_search_orders_by_similarity() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "x.md", "- alpha content", "", unit(4, 0));
        insert(&store, "b", "y.md", "- beta content", "", unit(4, 1));

        let results = store.vector_search(&unit(4, 0), 10, None).unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > 0.99);
        if results.len() > 1 {
            assert!(results[0].score >= results[1].score);
        }
    }

    #[test]
    fn vector_search_respects_parent_dir_filter() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "user/preferences.md", "- in user", "user", unit(4, 0));
        insert(&store, "b", "journal/2026-08-01.md", "- in journal", "journal", unit(4, 0));

        let results = store.vector_search(&unit(4, 0), 10, Some("user")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn fts_search_finds_keywords() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "x.md", "- decided to use PostgreSQL for storage", "", unit(4, 0));
        insert(&store, "b", "y.md", "- weekly planning notes", "", unit(4, 1));

        let results = store.fts_search("PostgreSQL", 10, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn find_similar_applies_threshold() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "x.md", "- exact match target", "", unit(4, 0));
        let mut near = vec![0.0; 4];
        near[0] = 0.9;
        near[1] = (1.0f32 - 0.81).sqrt();
        insert(&store, "b", "y.md", "- nearby content", "", near);

        let hits = store.find_similar(&unit(4, 0), 0.95, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        let hits = store.find_similar(&unit(4, 0), 0.85, None).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn delete_by_uri_removes_everything_and_is_idempotent() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "gone.md", "- first bullet here", "", unit(4, 0));
        insert(&store, "b", "gone.md", "- second bullet here", "", unit(4, 1));
        insert(&store, "c", "kept.md", "- survives deletion", "", unit(4, 2));

        assert_eq!(store.delete_by_uri("gone.md").unwrap(), 2);
        assert_eq!(store.delete_by_uri("gone.md").unwrap(), 0);

        // Invariant: vector and FTS entries exist iff the chunks row does.
        let vec_hits = store.vector_search(&unit(4, 0), 10, None).unwrap();
        assert!(vec_hits.iter().all(|r| r.uri == "kept.md"));
        let fts_hits = store.fts_search("bullet", 10, None).unwrap();
        assert!(fts_hits.is_empty());
    }

    #[test]
    fn delete_stale_preserves_surviving_counters() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "f.md", "- stays around", "", unit(4, 0));
        insert(&store, "b", "f.md", "- gets removed", "", unit(4, 1));
        store.increment_reinforcement("a").unwrap();

        let keep: HashSet<String> =
            [crate::chunker::content_hash("- stays around")].into_iter().collect();
        assert_eq!(store.delete_stale("f.md", &keep).unwrap(), 1);

        let rec = store.get_by_id("a").unwrap().unwrap();
        assert_eq!(rec.reinforcement, 1);
        assert!(store.get_by_id("b").unwrap().is_none());
    }

    #[test]
    fn counters_are_monotonic() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "x.md", "- counted content", "", unit(4, 0));

        assert_eq!(store.increment_reinforcement("a").unwrap(), 1);
        assert_eq!(store.increment_reinforcement("a").unwrap(), 2);

        store.increment_access_counts(&["a".to_string()]).unwrap();
        store.increment_access_counts(&["a".to_string()]).unwrap();
        let rec = store.get_by_id("a").unwrap().unwrap();
        assert_eq!(rec.access_count, 2);
    }

    #[test]
    fn increment_missing_chunk_is_not_found() {
        let store = VectorStore::in_memory(4).unwrap();
        let err = store.increment_reinforcement("nope").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn stats_aggregate_by_kind() {
        let store = VectorStore::in_memory(4).unwrap();
        insert(&store, "a", "x.md", "- first entry text", "", unit(4, 0));
        insert(&store, "b", "y.md", "- second entry text", "", unit(4, 1));

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_files, 2);
        assert!(stats.total_tokens > 0);
        assert_eq!(stats.by_kind.len(), 1);
        assert_eq!(stats.by_kind[0].0, "preference");
        assert_eq!(stats.by_kind[0].1.chunks, 2);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let store = VectorStore::in_memory(4).unwrap();
        let chunk = ChunkInsert {
            id: "z",
            uri: "z.md",
            content: "- dim mismatch",
            content_hash: "hashhashhashhash",
            parent_dir: "",
            kind: "",
            section: "",
            importance: 1,
            token_count: 4,
        };
        let err = store.upsert(&chunk, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, MemoryError::Storage(_)));
    }
}
