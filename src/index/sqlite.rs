//! SQLite FTS5 search index with optional exact vector scan

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::{IndexDocument, SearchHit, SearchIndex, SearchMode, SearchQuery};
use crate::embeddings::cosine_similarity;
use crate::error::{PlaybookError, Result};
use crate::playbook::Playbook;

/// Full-text index backed by SQLite
///
/// Vector search is enabled when `dims > 0`; neighbours are found by
/// scanning every stored embedding, which is fine for a local corpus.
pub struct SqliteSearchIndex {
    conn: Mutex<Option<Connection>>,
    dims: usize,
}

impl SqliteSearchIndex {
    /// Open (creating if needed) the index database at `path`
    pub fn open<P: AsRef<Path>>(path: P, dims: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PlaybookError::index(format!("create directory {}", parent.display()), e))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| PlaybookError::index(format!("open {}", path.display()), e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| PlaybookError::index("configure database", e))?;

        Self::with_connection(conn, dims)
    }

    /// Index that lives only as long as the value
    pub fn in_memory(dims: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| PlaybookError::index("open in-memory database", e))?;
        Self::with_connection(conn, dims)
    }

    fn with_connection(conn: Connection, dims: usize) -> Result<Self> {
        Self::init_schema(&conn).map_err(|e| PlaybookError::index("initialize schema", e))?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            dims,
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            -- Free-text fields, each matched independently
            CREATE VIRTUAL TABLE IF NOT EXISTS playbook_text USING fts5(
                id UNINDEXED,
                name,
                description,
                tags,
                steps,
                lessons,
                tokenize = 'porter unicode61'
            );

            -- Filter fields, numeric fields and the embedding
            CREATE TABLE IF NOT EXISTS playbook_docs (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                success_rate REAL NOT NULL DEFAULT 0,
                embedding BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_playbook_docs_status ON playbook_docs(status);
            CREATE INDEX IF NOT EXISTS idx_playbook_docs_category ON playbook_docs(category);
            "#,
        )
    }

    /// Whether nearest-neighbour queries are supported
    pub fn has_vectors(&self) -> bool {
        self.dims > 0
    }

    fn with_conn<T>(&self, context: &str, f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard
            .as_mut()
            .ok_or_else(|| PlaybookError::index(context.to_string(), "index is closed"))?;
        f(conn).map_err(|e| PlaybookError::index(context.to_string(), e))
    }

    fn upsert(conn: &Connection, doc: &IndexDocument) -> rusqlite::Result<()> {
        let embedding = if doc.embedding.is_empty() {
            None
        } else {
            Some(embedding_to_blob(&doc.embedding))
        };

        conn.execute(
            r#"INSERT OR REPLACE INTO playbook_docs
               (id, category, status, confidence, success_rate, embedding)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                doc.id,
                doc.category,
                doc.status.as_str(),
                doc.confidence,
                doc.success_rate,
                embedding,
            ],
        )?;

        // FTS5 has no upsert
        conn.execute("DELETE FROM playbook_text WHERE id = ?1", params![doc.id])?;
        conn.execute(
            "INSERT INTO playbook_text (id, name, description, tags, steps, lessons) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![doc.id, doc.name, doc.description, doc.tags, doc.steps, doc.lessons],
        )?;
        Ok(())
    }

    fn lexical_hits(conn: &Connection, query: &SearchQuery, limit: usize) -> rusqlite::Result<Vec<SearchHit>> {
        let fts_query = build_fts_query(&query.text);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare_cached(
            r#"SELECT playbook_text.id, -bm25(playbook_text) AS score
               FROM playbook_text
               JOIN playbook_docs d ON d.id = playbook_text.id
               WHERE playbook_text MATCH ?1
                 AND (?2 IS NULL OR d.status = ?2)
                 AND (?3 IS NULL OR d.category = ?3)
               ORDER BY score DESC
               LIMIT ?4"#,
        )?;

        let hits = stmt
            .query_map(
                params![
                    fts_query,
                    query.status.map(|s| s.as_str()),
                    category_filter(query),
                    limit as i64
                ],
                |row| {
                    Ok(SearchHit {
                        id: row.get(0)?,
                        score: row.get(1)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }

    fn vector_hits(conn: &Connection, query: &SearchQuery, limit: usize) -> rusqlite::Result<Vec<SearchHit>> {
        let mut stmt = conn.prepare_cached(
            r#"SELECT id, embedding FROM playbook_docs
               WHERE embedding IS NOT NULL
                 AND (?1 IS NULL OR status = ?1)
                 AND (?2 IS NULL OR category = ?2)"#,
        )?;

        let rows = stmt
            .query_map(params![query.status.map(|s| s.as_str()), category_filter(query)], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|(id, blob)| {
                let embedding = blob_to_embedding(&blob);
                SearchHit {
                    id,
                    score: cosine_similarity(&query.embedding, &embedding) as f64,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

impl SearchIndex for SqliteSearchIndex {
    fn index(&self, pb: &Playbook) -> Result<()> {
        let doc = IndexDocument::from(pb);
        self.with_conn(&format!("index playbook {}", pb.id), |conn| {
            let tx = conn.transaction()?;
            Self::upsert(&tx, &doc)?;
            tx.commit()
        })
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.with_conn(&format!("remove playbook {}", id), |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM playbook_docs WHERE id = ?1", params![id])?;
            tx.execute("DELETE FROM playbook_text WHERE id = ?1", params![id])?;
            tx.commit()
        })
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let limit = query.effective_limit();
        let use_vectors = self.has_vectors() && !query.embedding.is_empty();

        let mut hits = self.with_conn("search", |conn| match (query.mode, use_vectors) {
            (SearchMode::Lexical, _) | (_, false) => Self::lexical_hits(conn, query, limit),
            (SearchMode::Vector, true) => Self::vector_hits(conn, query, limit),
            (SearchMode::Hybrid, true) => {
                let lexical = Self::lexical_hits(conn, query, limit)?;
                let vector = Self::vector_hits(conn, query, limit)?;
                Ok(merge_hits(lexical, vector))
            }
        })?;

        if query.min_score > 0.0 {
            hits.retain(|h| h.score >= query.min_score);
        }
        hits.truncate(limit);

        debug!("Index search ({}) for {:?}: {} hits", query.mode, query.text, hits.len());
        Ok(hits)
    }

    fn reindex(&self, corpus: &[Playbook]) -> Result<()> {
        let docs: Vec<IndexDocument> = corpus.iter().map(IndexDocument::from).collect();
        self.with_conn("reindex", |conn| {
            let tx = conn.transaction()?;
            for doc in &docs {
                Self::upsert(&tx, doc)?;
            }
            tx.commit()
        })?;
        debug!("Reindexed {} playbooks", docs.len());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| PlaybookError::index("close", e))?;
        }
        Ok(())
    }
}

fn category_filter(query: &SearchQuery) -> Option<&str> {
    query.category.as_deref().filter(|c| !c.is_empty())
}

/// Reduce free text to quoted alphanumeric terms joined with OR
fn build_fts_query(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Combine lexical and vector hits by id, summing scores
fn merge_hits(lexical: Vec<SearchHit>, vector: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();
    for hit in lexical.into_iter().chain(vector) {
        match scores.get_mut(&hit.id) {
            Some(score) => *score += hit.score,
            None => {
                order.push(hit.id.clone());
                scores.insert(hit.id, hit.score);
            }
        }
    }

    let mut merged: Vec<SearchHit> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(&id).copied().unwrap_or_default();
            SearchHit { id, score }
        })
        .collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

/// Little-endian f32 encoding
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}
