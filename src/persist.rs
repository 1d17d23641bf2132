//! SQLite persistence: schema evolution, digest dedup, transactional writes.
//!
//! One connection per operation, WAL journaling so readers run alongside the
//! single writer. Schema creation is idempotent and patches older databases by
//! adding missing columns. A unique index on `work.content_sha1` (NULLs
//! allowed) enforces one work per content digest.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::chunk::ChunkSpan;
use crate::error::{PersistError, PersistResult};
use crate::segment::SceneSpan;

/// Open a SQLite database with the service defaults.
///
/// Pragmas: `foreign_keys = ON`, `journal_mode = WAL`, `synchronous = NORMAL`.
pub fn open_db(path: &Path) -> PersistResult<Connection> {
    let conn = Connection::open(path).map_err(|e| PersistError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

// ---------------------------------------------------------------------------
// DDL management
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS work (
      id            TEXT PRIMARY KEY,
      title         TEXT,
      author        TEXT,
      source        TEXT,
      license       TEXT,
      raw_text      BLOB,
      norm_text     TEXT,
      char_count    INTEGER,
      content_sha1  TEXT,
      ingest_run_id TEXT,
      created_at    TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
    );

    CREATE TABLE IF NOT EXISTS scene (
      id         TEXT PRIMARY KEY,
      work_id    TEXT NOT NULL,
      chapter_id TEXT,
      idx        INTEGER NOT NULL,
      char_start INTEGER,
      char_end   INTEGER,
      heading    TEXT,
      FOREIGN KEY (work_id) REFERENCES work(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS chunk (
      id          TEXT PRIMARY KEY,
      work_id     TEXT NOT NULL,
      scene_id    TEXT,
      idx         INTEGER NOT NULL,
      char_start  INTEGER,
      char_end    INTEGER,
      token_start INTEGER,
      token_end   INTEGER,
      text        TEXT NOT NULL,
      sha256      TEXT NOT NULL,
      FOREIGN KEY (work_id) REFERENCES work(id) ON DELETE CASCADE,
      FOREIGN KEY (scene_id) REFERENCES scene(id) ON DELETE SET NULL
    );

    CREATE TABLE IF NOT EXISTS ingest_run (
      id          TEXT PRIMARY KEY,
      created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
      params_json TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_work_title  ON work(title);
    CREATE INDEX IF NOT EXISTS idx_work_author ON work(author);
    CREATE INDEX IF NOT EXISTS idx_scene_work_idx ON scene(work_id, idx);

    CREATE INDEX IF NOT EXISTS idx_chunk_work_sha   ON chunk(work_id, sha256);
    CREATE INDEX IF NOT EXISTS idx_chunk_work_idx   ON chunk(work_id, idx);
    CREATE INDEX IF NOT EXISTS idx_chunk_work_scene ON chunk(work_id, scene_id, idx);
    CREATE INDEX IF NOT EXISTS idx_chunk_scene      ON chunk(scene_id);
    CREATE INDEX IF NOT EXISTS idx_chunk_work_span  ON chunk(work_id, char_start, char_end);
";

fn column_exists(conn: &Connection, table: &str, column: &str) -> PersistResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Create or patch the ingest tables and indexes. Safe to call repeatedly.
pub fn ensure_schema(conn: &Connection) -> PersistResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Backfill columns missing from older databases.
    if !column_exists(conn, "work", "content_sha1")? {
        conn.execute("ALTER TABLE work ADD COLUMN content_sha1 TEXT", [])?;
    }
    if !column_exists(conn, "work", "ingest_run_id")? {
        conn.execute("ALTER TABLE work ADD COLUMN ingest_run_id TEXT", [])?;
    }
    if !column_exists(conn, "work", "char_count")? {
        conn.execute("ALTER TABLE work ADD COLUMN char_count INTEGER", [])?;
    }

    // Idempotency: one work per content digest (NULLs allowed).
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_work_content_sha1 ON work(content_sha1)",
        [],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookups & helpers
// ---------------------------------------------------------------------------

/// Find an existing work by content digest (fast path) or by exact
/// normalized-text match (fallback when no digest is available).
pub fn find_existing_work(
    conn: &Connection,
    content_sha1: Option<&str>,
    norm_text: Option<&str>,
) -> PersistResult<Option<String>> {
    if let Some(sha1) = content_sha1 {
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM work WHERE content_sha1 = ? LIMIT 1",
                [sha1],
                |row| row.get(0),
            )
            .optional()?;
        if id.is_some() {
            return Ok(id);
        }
    }

    if let Some(text) = norm_text {
        if !text.is_empty() {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM work WHERE norm_text = ? LIMIT 1",
                    [text],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(id);
        }
    }

    Ok(None)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Byte offset of each codepoint boundary, plus the terminal offset.
/// Lets chunk materialization slice by character positions in O(1).
fn char_boundaries(text: &str) -> Vec<usize> {
    let mut offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    offsets.push(text.len());
    offsets
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Column values for a new `work` row.
#[derive(Debug, Clone, Copy)]
pub struct NewWork<'a> {
    pub title: Option<&'a str>,
    pub author: Option<&'a str>,
    pub source: Option<&'a str>,
    pub license: Option<&'a str>,
    pub raw_text: &'a [u8],
    pub norm_text: &'a str,
    pub content_sha1: Option<&'a str>,
}

/// Write ingest_run, work, scenes, and chunks in one transaction.
///
/// Returns the new work id.
pub fn persist_work_and_children(
    conn: &mut Connection,
    work: &NewWork<'_>,
    scenes: &[SceneSpan],
    chunks: &[ChunkSpan],
    run_params: &serde_json::Value,
) -> PersistResult<String> {
    let tx = conn.transaction()?;

    let run_id = new_id();
    tx.execute(
        "INSERT INTO ingest_run (id, params_json) VALUES (?, ?)",
        params![run_id, run_params.to_string()],
    )?;

    let work_id = new_id();
    tx.execute(
        "INSERT INTO work (id, title, author, source, license, raw_text, norm_text, char_count, content_sha1, ingest_run_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            work_id,
            work.title,
            work.author,
            work.source,
            work.license,
            work.raw_text,
            work.norm_text,
            work.norm_text.chars().count() as i64,
            work.content_sha1,
            run_id,
        ],
    )?;

    insert_children(&tx, &work_id, work.norm_text, scenes, chunks)?;

    tx.commit()?;
    Ok(work_id)
}

/// Atomically replace a work's scenes and chunks (resegmentation).
pub fn replace_segmentation(
    conn: &mut Connection,
    work_id: &str,
    norm_text: &str,
    scenes: &[SceneSpan],
    chunks: &[ChunkSpan],
) -> PersistResult<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM chunk WHERE work_id = ?", [work_id])?;
    tx.execute("DELETE FROM scene WHERE work_id = ?", [work_id])?;
    insert_children(&tx, work_id, norm_text, scenes, chunks)?;
    tx.commit()?;
    Ok(())
}

/// Batch-insert scene rows (ordered by idx, start), then chunk rows with
/// resolved scene ids and materialized, digested text.
fn insert_children(
    tx: &rusqlite::Transaction<'_>,
    work_id: &str,
    norm_text: &str,
    scenes: &[SceneSpan],
    chunks: &[ChunkSpan],
) -> PersistResult<()> {
    let mut ordered: Vec<&SceneSpan> = scenes.iter().collect();
    ordered.sort_by_key(|s| (s.idx, s.start));

    let mut scene_id_by_idx: HashMap<usize, String> = HashMap::new();
    {
        let mut insert_scene = tx.prepare(
            "INSERT INTO scene (id, work_id, chapter_id, idx, char_start, char_end, heading)
             VALUES (?, ?, NULL, ?, ?, ?, ?)",
        )?;
        for scene in &ordered {
            let scene_id = new_id();
            insert_scene.execute(params![
                scene_id,
                work_id,
                scene.idx as i64,
                scene.start as i64,
                scene.end as i64,
                scene.heading,
            ])?;
            scene_id_by_idx.insert(scene.idx, scene_id);
        }
    }

    // Scene resolution: the chunk's scene_idx mapping wins; otherwise fall
    // back to span containment over the ordered scenes.
    let scene_for_span = |start: usize| -> Option<&String> {
        ordered
            .iter()
            .find(|s| s.start <= start && start < s.end)
            .and_then(|s| scene_id_by_idx.get(&s.idx))
    };

    let boundaries = char_boundaries(norm_text);
    let clamp = |pos: usize| boundaries[pos.min(boundaries.len() - 1)];

    let mut insert_chunk = tx.prepare(
        "INSERT INTO chunk (id, work_id, scene_id, idx, char_start, char_end, token_start, token_end, text, sha256)
         VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)",
    )?;
    for chunk in chunks {
        let scene_id = chunk
            .scene_idx
            .and_then(|idx| scene_id_by_idx.get(&idx))
            .or_else(|| scene_for_span(chunk.start));

        let byte_start = clamp(chunk.start);
        let byte_end = clamp(chunk.end).max(byte_start);
        let text = &norm_text[byte_start..byte_end];

        insert_chunk.execute(params![
            new_id(),
            work_id,
            scene_id,
            chunk.idx as i64,
            chunk.start as i64,
            chunk.end as i64,
            text,
            sha256_hex(text),
        ])?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Layer counts for one work.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Sizes {
    pub chars: u64,
    pub scenes: u64,
    pub chunks: u64,
}

/// Recompute a work's sizes from the stored rows.
pub fn sizes_for_work(conn: &Connection, work_id: &str) -> PersistResult<Sizes> {
    let chars: Option<i64> = conn
        .query_row(
            "SELECT char_count FROM work WHERE id = ?",
            [work_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    let scenes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM scene WHERE work_id = ?",
        [work_id],
        |row| row.get(0),
    )?;
    let chunks: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chunk WHERE work_id = ?",
        [work_id],
        |row| row.get(0),
    )?;
    Ok(Sizes {
        chars: chars.unwrap_or(0).max(0) as u64,
        scenes: scenes.max(0) as u64,
        chunks: chunks.max(0) as u64,
    })
}

/// Load a work's normalized text.
pub fn load_norm_text(conn: &Connection, work_id: &str) -> PersistResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT COALESCE(norm_text, '') FROM work WHERE id = ?",
            [work_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Row shape for work listings.
#[derive(Debug, Clone, Serialize)]
pub struct WorkSummary {
    pub id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub chars: u64,
    pub scenes: u64,
    pub chunks: u64,
    pub created_at: String,
}

/// List works (newest first) with scene/chunk counts.
///
/// `q` substring-matches title or author; `author` narrows to author only.
pub fn list_works(
    conn: &Connection,
    q: Option<&str>,
    author: Option<&str>,
    limit: u32,
    offset: u32,
) -> PersistResult<Vec<WorkSummary>> {
    let mut sql = String::from(
        "SELECT w.id, w.title, w.author, COALESCE(w.char_count,0), w.created_at,
                COALESCE(sc.scenes,0), COALESCE(ch.chunks,0)
         FROM work w
         LEFT JOIN (SELECT work_id, COUNT(*) AS scenes FROM scene GROUP BY work_id) sc ON sc.work_id = w.id
         LEFT JOIN (SELECT work_id, COUNT(*) AS chunks FROM chunk GROUP BY work_id) ch ON ch.work_id = w.id ",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(q) = q {
        clauses.push("(COALESCE(w.title,'') LIKE ? OR COALESCE(w.author,'') LIKE ?)");
        binds.push(format!("%{q}%").into());
        binds.push(format!("%{q}%").into());
    }
    if let Some(author) = author {
        clauses.push("COALESCE(w.author,'') LIKE ?");
        binds.push(format!("%{author}%").into());
    }
    if !clauses.is_empty() {
        sql.push_str("WHERE ");
        sql.push_str(&clauses.join(" AND "));
        sql.push(' ');
    }
    sql.push_str("ORDER BY datetime(w.created_at) DESC LIMIT ? OFFSET ?");
    binds.push(i64::from(limit).into());
    binds.push(i64::from(offset).into());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), |row| {
        Ok(WorkSummary {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            chars: row.get::<_, i64>(3)?.max(0) as u64,
            created_at: row.get(4)?,
            scenes: row.get::<_, i64>(5)?.max(0) as u64,
            chunks: row.get::<_, i64>(6)?.max(0) as u64,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Full detail for a single work (without text bodies).
#[derive(Debug, Clone, Serialize)]
pub struct WorkDetail {
    pub id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub content_sha1: Option<String>,
    pub chars: u64,
    pub created_at: String,
}

/// Load one work's detail row.
pub fn get_work(conn: &Connection, work_id: &str) -> PersistResult<Option<WorkDetail>> {
    Ok(conn
        .query_row(
            "SELECT id, title, author, source, content_sha1, COALESCE(char_count,0), created_at
             FROM work WHERE id = ?",
            [work_id],
            |row| {
                Ok(WorkDetail {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    author: row.get(2)?,
                    source: row.get(3)?,
                    content_sha1: row.get(4)?,
                    chars: row.get::<_, i64>(5)?.max(0) as u64,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?)
}

/// Scene row as served to readers.
#[derive(Debug, Clone, Serialize)]
pub struct SceneRow {
    pub scene_id: String,
    pub idx: u64,
    pub start: u64,
    pub end: u64,
    pub heading: Option<String>,
}

/// Ordered scenes of a work.
pub fn scenes_for_work(conn: &Connection, work_id: &str) -> PersistResult<Vec<SceneRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, idx, char_start, char_end, heading
         FROM scene WHERE work_id = ? ORDER BY idx ASC",
    )?;
    let rows = stmt.query_map([work_id], |row| {
        Ok(SceneRow {
            scene_id: row.get(0)?,
            idx: row.get::<_, i64>(1)?.max(0) as u64,
            start: row.get::<_, i64>(2)?.max(0) as u64,
            end: row.get::<_, i64>(3)?.max(0) as u64,
            heading: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Chunk row as served to readers (text omitted).
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub scene_id: Option<String>,
    pub idx: u64,
    pub start: u64,
    pub end: u64,
}

/// Ordered chunks of a work.
pub fn chunks_for_work(conn: &Connection, work_id: &str) -> PersistResult<Vec<ChunkRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, scene_id, idx, char_start, char_end
         FROM chunk WHERE work_id = ? ORDER BY idx ASC",
    )?;
    let rows = stmt.query_map([work_id], |row| {
        Ok(ChunkRow {
            chunk_id: row.get(0)?,
            scene_id: row.get(1)?,
            idx: row.get::<_, i64>(2)?.max(0) as u64,
            start: row.get::<_, i64>(3)?.max(0) as u64,
            end: row.get::<_, i64>(4)?.max(0) as u64,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Read + write probe: BEGIN IMMEDIATE, insert and delete in a scratch table.
pub fn ready_check(conn: &Connection) -> PersistResult<()> {
    ensure_schema(conn)?;
    conn.execute_batch(
        "BEGIN IMMEDIATE;
         CREATE TABLE IF NOT EXISTS __readyz (ts TEXT NOT NULL);
         INSERT INTO __readyz (ts) VALUES (strftime('%Y-%m-%dT%H:%M:%fZ','now'));
         DELETE FROM __readyz;
         COMMIT;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FTS over chunks (read-side affordance)
// ---------------------------------------------------------------------------

/// Create `chunk_fts` and its sync triggers if missing; optionally rebuild.
pub fn ensure_chunk_fts(conn: &Connection, rebuild: bool) -> PersistResult<()> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='chunk_fts'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let mut rebuild = rebuild;
    if exists.is_none() {
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
               text,
               content='chunk',
               content_rowid='rowid'
             );
             CREATE TRIGGER IF NOT EXISTS chunk_fts_after_insert AFTER INSERT ON chunk
             BEGIN
               INSERT INTO chunk_fts(rowid, text) VALUES (new.rowid, new.text);
             END;
             CREATE TRIGGER IF NOT EXISTS chunk_fts_after_delete AFTER DELETE ON chunk
             BEGIN
               INSERT INTO chunk_fts(chunk_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
             END;
             CREATE TRIGGER IF NOT EXISTS chunk_fts_after_update_text AFTER UPDATE OF text ON chunk
             BEGIN
               INSERT INTO chunk_fts(chunk_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
               INSERT INTO chunk_fts(rowid, text) VALUES (new.rowid, new.text);
             END;",
        )?;
        rebuild = true;
    }
    if rebuild {
        conn.execute("INSERT INTO chunk_fts(chunk_fts) VALUES ('rebuild')", [])?;
    }
    Ok(())
}

/// One FTS hit over the chunk layer.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub scene_id: Option<String>,
    pub idx: u64,
    pub start: u64,
    pub end: u64,
    pub score: Option<f64>,
    pub snippet: String,
}

/// bm25-ranked FTS search, optionally restricted to one work.
pub fn search_chunks(
    conn: &Connection,
    query: &str,
    work_id: Option<&str>,
    limit: u32,
    offset: u32,
) -> PersistResult<Vec<SearchHit>> {
    let mut sql = String::from(
        "SELECT c.id, c.scene_id, c.idx, c.char_start, c.char_end,
                bm25(chunk_fts), snippet(chunk_fts, -1, '[', ']', ' … ', 8)
         FROM chunk_fts JOIN chunk c ON c.rowid = chunk_fts.rowid
         WHERE chunk_fts MATCH ? ",
    );
    let mut binds: Vec<rusqlite::types::Value> = vec![query.to_string().into()];
    if let Some(work_id) = work_id {
        sql.push_str("AND c.work_id = ? ");
        binds.push(work_id.to_string().into());
    }
    sql.push_str("ORDER BY bm25(chunk_fts) LIMIT ? OFFSET ?");
    binds.push(i64::from(limit).into());
    binds.push(i64::from(offset).into());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), |row| {
        Ok(SearchHit {
            chunk_id: row.get(0)?,
            scene_id: row.get(1)?,
            idx: row.get::<_, i64>(2)?.max(0) as u64,
            start: row.get::<_, i64>(3)?.max(0) as u64,
            end: row.get::<_, i64>(4)?.max(0) as u64,
            score: row.get(5)?,
            snippet: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::get_profile;
    use crate::{chunk::make_chunks, segment::segment_to_scenes};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn persist_text(conn: &mut Connection, text: &str, sha1: Option<&str>) -> String {
        let scenes = segment_to_scenes(text, get_profile(Some("dense")));
        let chunks = make_chunks(&scenes, None, None, get_profile(Some("dense")));
        let work = NewWork {
            title: Some("Test"),
            author: None,
            source: Some("test.txt"),
            license: None,
            raw_text: text.as_bytes(),
            norm_text: text,
            content_sha1: sha1,
        };
        persist_work_and_children(conn, &work, &scenes, &chunks, &serde_json::json!({})).unwrap()
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = test_conn();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
    }

    #[test]
    fn digest_uniqueness_enforced() {
        let mut conn = test_conn();
        persist_text(&mut conn, "Alpha beta gamma delta epsilon zeta.", Some("abc123"));
        let scenes = segment_to_scenes("Other text entirely here.", get_profile(None));
        let chunks = make_chunks(&scenes, None, None, get_profile(None));
        let dup = NewWork {
            title: None,
            author: None,
            source: None,
            license: None,
            raw_text: b"other",
            norm_text: "Other text entirely here.",
            content_sha1: Some("abc123"),
        };
        let err =
            persist_work_and_children(&mut conn, &dup, &scenes, &chunks, &serde_json::json!({}));
        assert!(err.is_err(), "duplicate digest must violate the unique index");
    }

    #[test]
    fn find_by_digest_then_by_text() {
        let mut conn = test_conn();
        let text = "Some normalized body of text for lookup purposes.";
        let id = persist_text(&mut conn, text, Some("deadbeef"));

        assert_eq!(
            find_existing_work(&conn, Some("deadbeef"), None).unwrap(),
            Some(id.clone())
        );
        assert_eq!(
            find_existing_work(&conn, None, Some(text)).unwrap(),
            Some(id)
        );
        assert_eq!(find_existing_work(&conn, Some("nope"), None).unwrap(), None);
        assert_eq!(find_existing_work(&conn, None, Some("")).unwrap(), None);
    }

    #[test]
    fn chunk_rows_materialize_text_and_digest() {
        let mut conn = test_conn();
        let text = "First scene with plenty of characters inside.\n\nSecond scene, also long enough to keep.\n";
        let id = persist_text(&mut conn, text, Some("sha-x"));

        let mut stmt = conn
            .prepare("SELECT char_start, char_end, text, sha256 FROM chunk WHERE work_id = ?")
            .unwrap();
        let rows: Vec<(i64, i64, String, String)> = stmt
            .query_map([&id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(!rows.is_empty());
        for (start, end, chunk_text, digest) in rows {
            let expected: String = text
                .chars()
                .skip(start as usize)
                .take((end - start) as usize)
                .collect();
            assert_eq!(chunk_text, expected);
            assert_eq!(digest, sha256_hex(&chunk_text));
        }
    }

    #[test]
    fn chunk_scene_resolution_falls_back_to_containment() {
        let mut conn = test_conn();
        let text = "0123456789abcdefghij";
        let scenes = vec![SceneSpan {
            idx: 0,
            start: 0,
            end: 20,
            heading: None,
        }];
        let chunks = vec![ChunkSpan {
            idx: 0,
            start: 5,
            end: 15,
            scene_idx: None,
        }];
        let work = NewWork {
            title: None,
            author: None,
            source: None,
            license: None,
            raw_text: text.as_bytes(),
            norm_text: text,
            content_sha1: Some("containment"),
        };
        let id =
            persist_work_and_children(&mut conn, &work, &scenes, &chunks, &serde_json::json!({}))
                .unwrap();

        let scene_id: Option<String> = conn
            .query_row("SELECT scene_id FROM chunk WHERE work_id = ?", [&id], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(scene_id.is_some(), "containment fallback should attach the scene");
    }

    #[test]
    fn sizes_roundtrip() {
        let mut conn = test_conn();
        let text = "Scene one is long enough to stay around.\n\nScene two is also long enough to stay.\n";
        let id = persist_text(&mut conn, text, Some("sizes"));
        let sizes = sizes_for_work(&conn, &id).unwrap();
        assert_eq!(sizes.chars, text.chars().count() as u64);
        assert_eq!(sizes.scenes, 2);
        assert!(sizes.chunks >= 2);
    }

    #[test]
    fn replace_segmentation_keeps_work_id() {
        let mut conn = test_conn();
        let text = "Scene one is long enough to stay around.\n\nScene two is also long enough to stay.\n";
        let id = persist_text(&mut conn, text, Some("reseg"));
        let before = sizes_for_work(&conn, &id).unwrap();

        // Re-chunk with a tiny window: same scenes, many more chunks.
        let scenes = segment_to_scenes(text, get_profile(Some("dense")));
        let chunks = make_chunks(&scenes, Some(10), Some(10), get_profile(Some("dense")));
        replace_segmentation(&mut conn, &id, text, &scenes, &chunks).unwrap();

        let after = sizes_for_work(&conn, &id).unwrap();
        assert_eq!(before.scenes, after.scenes);
        assert!(after.chunks > before.chunks);

        let work_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM work", [], |r| r.get(0))
            .unwrap();
        assert_eq!(work_count, 1);
    }

    #[test]
    fn cascade_delete_work_removes_scenes() {
        let mut conn = test_conn();
        let text = "Scene body long enough for the dense minimum.\n";
        let id = persist_text(&mut conn, text, Some("cascade"));
        conn.execute("DELETE FROM work WHERE id = ?", [&id]).unwrap();
        let scenes: i64 = conn
            .query_row("SELECT COUNT(*) FROM scene", [], |r| r.get(0))
            .unwrap();
        assert_eq!(scenes, 0);
    }

    #[test]
    fn fts_search_finds_chunk_terms() {
        let mut conn = test_conn();
        let text = "The xylophone concert was unforgettable for everyone present.\n";
        let id = persist_text(&mut conn, text, Some("fts"));
        ensure_chunk_fts(&conn, false).unwrap();

        let hits = search_chunks(&conn, "xylophone", None, 25, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("xylophone"));

        let scoped = search_chunks(&conn, "xylophone", Some(&id), 25, 0).unwrap();
        assert_eq!(scoped.len(), 1);
        let miss = search_chunks(&conn, "xylophone", Some("other-work"), 25, 0).unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn list_works_filters_and_counts() {
        let mut conn = test_conn();
        persist_text(&mut conn, "Body one, long enough for the dense profile.\n", Some("w1"));
        let scenes = segment_to_scenes("Body two, also long enough to persist.\n", get_profile(None));
        let chunks = make_chunks(&scenes, None, None, get_profile(None));
        let work = NewWork {
            title: Some("Moby-Dick"),
            author: Some("Melville"),
            source: None,
            license: None,
            raw_text: b"two",
            norm_text: "Body two, also long enough to persist.\n",
            content_sha1: Some("w2"),
        };
        persist_work_and_children(&mut conn, &work, &scenes, &chunks, &serde_json::json!({}))
            .unwrap();

        let all = list_works(&conn, None, None, 50, 0).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|w| w.scenes >= 1 && w.chunks >= 1));

        let filtered = list_works(&conn, Some("moby"), None, 50, 0).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].author.as_deref(), Some("Melville"));

        let by_author = list_works(&conn, None, Some("melv"), 50, 0).unwrap();
        assert_eq!(by_author.len(), 1);
    }
}
