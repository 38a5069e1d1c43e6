use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{EngineError, EngineResult};
use crate::types::{KnnFilters, Memory, MemoryType, Source, Stats};

/// SQLite-backed persistence layer (spec.md §4.5, §3 data model).
///
/// Embeddings live in a `sqlite-vec` `vec0` virtual table keyed by the same
/// rowid as `memories`, so a `JOIN` on rowid recovers both halves of a row.
/// `vec0` gives exact KNN via `MATCH ... AND k = ?`; spec.md §9 sanctions a
/// brute-force fallback only above 10^5 rows, which this does not need
/// since sqlite-vec scales past that without a second code path.
pub struct Store {
    conn: Connection,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    content         TEXT NOT NULL,
    mem_type        TEXT NOT NULL,
    project         TEXT,
    category        TEXT,
    reasoning       TEXT,
    source          TEXT NOT NULL,
    importance      INTEGER NOT NULL DEFAULT 3,
    confidence      REAL NOT NULL DEFAULT 1.0,
    created_at      INTEGER NOT NULL,
    last_accessed   INTEGER,
    access_count    INTEGER NOT NULL DEFAULT 0,
    expires_at      INTEGER,
    supersedes      INTEGER REFERENCES memories(id),
    is_obsolete     INTEGER NOT NULL DEFAULT 0,
    tags            TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(mem_type);
CREATE INDEX IF NOT EXISTS idx_memories_obsolete ON memories(is_obsolete);

CREATE TABLE IF NOT EXISTS embedding_cache (
    content_hash    TEXT PRIMARY KEY,
    embedding       BLOB NOT NULL
);
"#;

fn vec_schema(dimensions: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_vectors USING vec0(\
            memory_id INTEGER PRIMARY KEY, \
            embedding float[{dimensions}]\
        );"
    )
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path`, registers
    /// `sqlite-vec`, sets WAL + a busy timeout the way `tandem-memory`'s
    /// `MemoryDatabase::new` does, and ensures the schema exists.
    pub fn open(path: &Path, dimensions: usize) -> EngineResult<Self> {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&vec_schema(dimensions))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory(dimensions: usize) -> EngineResult<Self> {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&vec_schema(dimensions))?;
        Ok(Self { conn })
    }

    /// Inserts a memory row and its embedding in one transaction, enforcing
    /// the embedding/memory row parity invariant (spec.md §3): the two
    /// writes either both land or neither does.
    pub fn insert(&mut self, memory: &Memory, embedding: &[f32]) -> EngineResult<i64> {
        if let Some(exp) = memory.expires_at {
            if exp < memory.created_at {
                return Err(EngineError::InvalidInput(
                    "expires_at must not precede created_at".into(),
                ));
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO memories (
                content, mem_type, project, category, reasoning, source,
                importance, confidence, created_at, last_accessed, access_count,
                expires_at, supersedes, is_obsolete, tags
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                memory.content,
                memory.mem_type.as_str(),
                memory.project,
                memory.category,
                memory.reasoning,
                memory.source.as_str(),
                memory.importance,
                memory.confidence,
                memory.created_at,
                memory.last_accessed,
                memory.access_count,
                memory.expires_at,
                memory.supersedes,
                memory.is_obsolete as i64,
                serde_json::to_string(&memory.tags)?,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO memory_vectors (memory_id, embedding) VALUES (?1, ?2)",
            params![id, bytes_of(embedding)],
        )?;

        if let Some(target) = memory.supersedes {
            tx.execute(
                "UPDATE memories SET is_obsolete = 1 WHERE id = ?1",
                params![target],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    pub fn get(&self, id: i64) -> EngineResult<Option<Memory>> {
        self.conn
            .query_row(
                "SELECT * FROM memories WHERE id = ?1",
                params![id],
                row_to_memory,
            )
            .optional()
            .map_err(EngineError::from)
    }

    /// K nearest neighbours by vector distance, joined back to their rows
    /// and filtered per `filters` (spec.md §4.5, §4.8).
    pub fn knn(&self, query: &[f32], k: usize, filters: &KnnFilters) -> EngineResult<Vec<(Memory, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.*, v.distance
             FROM memory_vectors v
             JOIN memories m ON m.id = v.memory_id
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance ASC",
        )?;

        let rows = stmt.query_map(params![bytes_of(query), k as i64], |row| {
            let mem = row_to_memory(row)?;
            let distance: f64 = row.get("distance")?;
            Ok((mem, distance))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (mem, distance) = r?;
            if !filters.include_obsolete && mem.is_obsolete {
                continue;
            }
            if let Some(ref t) = filters.mem_type {
                if mem.mem_type != *t {
                    continue;
                }
            }
            if let Some(min) = filters.min_importance {
                if mem.importance < min {
                    continue;
                }
            }
            if let Some(exp) = mem.expires_at {
                if exp <= filters.now {
                    continue;
                }
            }
            out.push((mem, distance));
        }
        Ok(out)
    }

    /// Record an access: bumps `access_count`, sets `last_accessed` (spec.md
    /// §4.8 usage factor).
    pub fn record_access(&self, id: i64, now: i64) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// Bumps access stats for every id in `ids` in one transaction, so a
    /// concurrent reader observes either all pre-bump or all post-bump
    /// values for a single `recall` call (spec.md §5).
    pub fn update_stats(&mut self, ids: &[i64], now: i64) -> EngineResult<()> {
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Closest active (unless `include_obsolete`) row to `embedding`, used
    /// by `remember`'s dedup step (spec.md §4.6).
    pub fn nearest_one(&self, embedding: &[f32], include_obsolete: bool, now: i64) -> EngineResult<Option<(Memory, f64)>> {
        let filters = KnnFilters {
            include_obsolete,
            now,
            ..Default::default()
        };
        Ok(self.knn(embedding, 1, &filters)?.into_iter().next())
    }

    /// Replaces `content` and its embedding on an existing row in one
    /// transaction (spec.md §4.5 `update_content`).
    pub fn update_content(&mut self, id: i64, content: &str, embedding: &[f32]) -> EngineResult<()> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE memories SET content = ?2 WHERE id = ?1",
            params![id, content],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("memory {id} not found")));
        }
        tx.execute(
            "UPDATE memory_vectors SET embedding = ?2 WHERE memory_id = ?1",
            params![id, bytes_of(embedding)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Updates arbitrary scalar fields (importance, confidence, tags) on an
    /// existing row without touching its embedding.
    pub fn update_fields(&self, id: i64, importance: Option<i32>, confidence: Option<f64>, tags: Option<&[String]>) -> EngineResult<()> {
        if let Some(v) = importance {
            self.conn
                .execute("UPDATE memories SET importance = ?2 WHERE id = ?1", params![id, v])?;
        }
        if let Some(v) = confidence {
            self.conn
                .execute("UPDATE memories SET confidence = ?2 WHERE id = ?1", params![id, v])?;
        }
        if let Some(v) = tags {
            self.conn.execute(
                "UPDATE memories SET tags = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(v)?],
            )?;
        }
        Ok(())
    }

    /// K nearest neighbours of an existing row's own embedding, excluding
    /// itself (spec.md §4.5 `neighbors_of`, used by consolidation).
    pub fn neighbors_of(&self, id: i64, k: usize, now: i64) -> EngineResult<Vec<(Memory, f64)>> {
        let Some(embedding) = self.embedding_of(id)? else {
            return Ok(Vec::new());
        };
        let filters = KnnFilters {
            now,
            ..Default::default()
        };
        Ok(self
            .knn(&embedding, k + 1, &filters)?
            .into_iter()
            .filter(|(m, _)| m.id != id)
            .take(k)
            .collect())
    }

    pub fn set_obsolete(&self, id: i64, obsolete: bool) -> EngineResult<()> {
        let changed = self.conn.execute(
            "UPDATE memories SET is_obsolete = ?2 WHERE id = ?1",
            params![id, obsolete as i64],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("memory {id} not found")));
        }
        Ok(())
    }

    /// Marks `id` obsolete and records which row superseded it, used by
    /// consolidation (spec.md §4.9 step 3).
    pub fn set_obsolete_with_supersedes(&self, id: i64, winner_id: i64) -> EngineResult<()> {
        let changed = self.conn.execute(
            "UPDATE memories SET is_obsolete = 1, supersedes = ?2 WHERE id = ?1",
            params![id, winner_id],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("memory {id} not found")));
        }
        Ok(())
    }

    pub fn delete(&mut self, id: i64) -> EngineResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM memory_vectors WHERE memory_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        tx.commit()?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("memory {id} not found")));
        }
        Ok(())
    }

    /// Deletes every active memory of `category` within `project` (spec.md
    /// §4.6 `forget_by_category`). Returns the number removed.
    pub fn delete_by_category(&mut self, project: Option<&str>, category: &str) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM memories WHERE category = ?1 AND project IS ?2",
            )?;
            let rows = stmt.query_map(params![category, project], |r| r.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for id in &ids {
            tx.execute("DELETE FROM memory_vectors WHERE memory_id = ?1", params![id])?;
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(ids.len())
    }

    pub fn delete_by_source(&mut self, source: Source) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        let ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM memories WHERE source = ?1")?;
            let rows = stmt.query_map(params![source.as_str()], |r| r.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for id in &ids {
            tx.execute("DELETE FROM memory_vectors WHERE memory_id = ?1", params![id])?;
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(ids.len())
    }

    /// Rows unused past `max_age_unused_days` with confidence below
    /// `min_confidence` and zero accesses, plus any expired row, regardless
    /// of obsolete state (spec.md §4.9 `garbage_collect`).
    pub fn gc_candidates(&self, now: i64, max_age_unused_days: i64, min_confidence: f64) -> EngineResult<Vec<i64>> {
        let cutoff = now - max_age_unused_days * 86_400;
        let mut stmt = self.conn.prepare(
            "SELECT id FROM memories
             WHERE (
                 (last_accessed IS NULL OR last_accessed < ?1)
                 AND confidence < ?2
                 AND access_count = 0
             )
             OR (expires_at IS NOT NULL AND expires_at < ?3)",
        )?;
        let rows = stmt.query_map(params![cutoff, min_confidence, now], |r| r.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn delete_many(&mut self, ids: &[i64]) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM memory_vectors WHERE memory_id = ?1", params![id])?;
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(ids.len())
    }

    /// Embedding rows with no matching `memories` row, or vice versa
    /// (spec.md §3 invariant: row/embedding parity). Used by
    /// `cleanup_corrupted` (spec.md §4.9).
    pub fn find_orphaned_vectors(&self) -> EngineResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.memory_id FROM memory_vectors v
             LEFT JOIN memories m ON m.id = v.memory_id
             WHERE m.id IS NULL",
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn find_memories_without_vectors(&self) -> EngineResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id FROM memories m
             LEFT JOIN memory_vectors v ON v.memory_id = m.id
             WHERE v.memory_id IS NULL",
        )?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn delete_orphaned_vector(&self, memory_id: i64) -> EngineResult<()> {
        self.conn
            .execute("DELETE FROM memory_vectors WHERE memory_id = ?1", params![memory_id])?;
        Ok(())
    }

    /// All active, non-expired memories, used by `consolidate` (spec.md
    /// §4.9) to build the candidate pool for clustering.
    pub fn scan_active(&self, now: i64) -> EngineResult<Vec<Memory>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM memories
             WHERE is_obsolete = 0 AND (expires_at IS NULL OR expires_at > ?1)",
        )?;
        let rows = stmt.query_map(params![now], row_to_memory)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Looks up a chunk's embedding by content hash, avoiding a redundant
    /// HTTP round trip to the embedder when the same text recurs (spec.md
    /// §4.3 constrains `EmbedderClient` itself to be stateless; this cache
    /// lives in the `Store` instead).
    pub fn cached_embedding(&self, content_hash: &str) -> EngineResult<Option<Vec<f32>>> {
        self.conn
            .query_row(
                "SELECT embedding FROM embedding_cache WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    let bytes: Vec<u8> = row.get(0)?;
                    Ok(floats_of(&bytes))
                },
            )
            .optional()
            .map_err(EngineError::from)
    }

    pub fn cache_embedding(&self, content_hash: &str, embedding: &[f32]) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO embedding_cache (content_hash, embedding) VALUES (?1, ?2)",
            params![content_hash, bytes_of(embedding)],
        )?;
        Ok(())
    }

    pub fn embedding_of(&self, id: i64) -> EngineResult<Option<Vec<f32>>> {
        self.conn
            .query_row(
                "SELECT embedding FROM memory_vectors WHERE memory_id = ?1",
                params![id],
                |row| {
                    let bytes: Vec<u8> = row.get(0)?;
                    Ok(floats_of(&bytes))
                },
            )
            .optional()
            .map_err(EngineError::from)
    }

    pub fn stats(&self, now: i64) -> EngineResult<Stats> {
        let total_active: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE is_obsolete = 0 AND (expires_at IS NULL OR expires_at > ?1)",
            params![now],
            |r| r.get(0),
        )?;
        let total_obsolete: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM memories WHERE is_obsolete = 1", [], |r| r.get(0))?;

        let mut by_type = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT mem_type, COUNT(*) FROM memories WHERE is_obsolete = 0 GROUP BY mem_type")?;
        let rows = stmt.query_map([], |r| {
            let t: String = r.get(0)?;
            let c: u64 = r.get(1)?;
            Ok((t, c))
        })?;
        for r in rows {
            let (t, c) = r?;
            by_type.push((MemoryType::parse(&t).unwrap_or_default(), c));
        }

        let mut by_project = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT project, COUNT(*) FROM memories WHERE is_obsolete = 0 GROUP BY project")?;
        let rows = stmt.query_map([], |r| {
            let p: Option<String> = r.get(0)?;
            let c: u64 = r.get(1)?;
            Ok((p, c))
        })?;
        for r in rows {
            by_project.push(r?);
        }

        let avg_importance: f64 = self
            .conn
            .query_row(
                "SELECT COALESCE(AVG(importance), 0.0) FROM memories WHERE is_obsolete = 0",
                [],
                |r| r.get(0),
            )?;

        let oldest_created_at: Option<i64> =
            self.conn
                .query_row("SELECT MIN(created_at) FROM memories", [], |r| r.get(0))?;
        let newest_created_at: Option<i64> =
            self.conn
                .query_row("SELECT MAX(created_at) FROM memories", [], |r| r.get(0))?;

        Ok(Stats {
            total_active,
            total_obsolete,
            by_type,
            by_project,
            avg_importance,
            oldest_created_at,
            newest_created_at,
        })
    }
}

fn bytes_of(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn floats_of(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let mem_type: String = row.get("mem_type")?;
    let source: String = row.get("source")?;
    let tags: String = row.get("tags")?;
    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        mem_type: MemoryType::parse(&mem_type).unwrap_or_default(),
        project: row.get("project")?,
        category: row.get("category")?,
        reasoning: row.get("reasoning")?,
        source: Source::parse(&source).unwrap_or_default(),
        importance: row.get("importance")?,
        confidence: row.get("confidence")?,
        created_at: row.get("created_at")?,
        last_accessed: row.get("last_accessed")?,
        access_count: row.get("access_count")?,
        expires_at: row.get("expires_at")?,
        supersedes: row.get("supersedes")?,
        is_obsolete: row.get::<_, i64>("is_obsolete")? != 0,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
    })
}
