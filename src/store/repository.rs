//! The single interface to the Knowledge Store. No other module issues raw
//! SQL; every read and write the core performs goes through a
//! [`Repository`] method.

use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::models::{
    model_slug, Chunk, DedupDecision, NewChunk, ScoredChunk, Source, SourceSummary, UpsertOutcome,
};

pub struct Repository {
    pool: SqlitePool,
}

/// A chunk with its computed embedding and full-text representation, ready
/// for [`Repository::commit_ingest`].
pub struct PreparedChunk {
    pub new_chunk: NewChunk,
    pub vector: Vec<f32>,
    pub fts_text: String,
}

/// Input to the orchestrator's atomic commit.
pub struct IngestCommit<'a> {
    pub path: &'a str,
    pub digest: &'a str,
    pub embedding_model: &'a str,
    /// `Some(old_source_id)` when this ingest is replacing a prior revision
    /// of the same path under a different digest.
    pub replacing: Option<&'a str>,
    pub chunks: &'a [PreparedChunk],
    pub summary: Option<&'a str>,
}

/// 4-byte little-endian f32 components, concatenated.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read-only dedup check used by the orchestrator before it does any
    /// chunking or LLM work: tells it whether to skip, replace, or proceed
    /// fresh, without writing anything.
    pub async fn peek_dedup(&self, path: &str, digest: &str) -> CoreResult<DedupDecision> {
        let existing = sqlx::query(
            "SELECT id, content_hash FROM sources WHERE path = ? ORDER BY ingested_at DESC LIMIT 1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        match existing {
            Some(row) => {
                let existing_hash: String = row.get("content_hash");
                let existing_id: String = row.get("id");
                if existing_hash == digest {
                    Ok(DedupDecision::AlreadyPresent { source_id: existing_id })
                } else {
                    Ok(DedupDecision::Replacing { old_source_id: existing_id })
                }
            }
            None => Ok(DedupDecision::New),
        }
    }

    /// Source upsert per spec §4.1, exposed as a standalone primitive (e.g.
    /// for re-embedding flows that don't go through the orchestrator).
    /// `(path, digest)` already present is a no-op; `path` present under a
    /// different digest purges all dependents transactionally before
    /// inserting the new revision. The orchestrator's main ingest path uses
    /// [`Repository::commit_ingest`] instead, so that Source, Chunks,
    /// vectors, FTS rows, and Summary land in one transaction rather than
    /// two.
    pub async fn upsert_source(
        &self,
        path: &str,
        digest: &str,
        embedding_model: &str,
    ) -> CoreResult<UpsertOutcome> {
        let existing = sqlx::query(
            "SELECT id, content_hash FROM sources WHERE path = ? ORDER BY ingested_at DESC LIMIT 1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        if let Some(row) = &existing {
            let existing_hash: String = row.get("content_hash");
            let existing_id: String = row.get("id");
            if existing_hash == digest {
                return Ok(UpsertOutcome::AlreadyPresent {
                    source_id: existing_id,
                });
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        let replaced = existing.is_some();
        if let Some(row) = &existing {
            let old_id: String = row.get("id");
            purge_tx(&mut tx, &old_id)
                .await
                .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        }

        let new_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sources (id, path, content_hash, embedding_model, ingested_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new_id)
        .bind(path)
        .bind(digest)
        .bind(embedding_model)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        if replaced {
            Ok(UpsertOutcome::Replaced { source_id: new_id })
        } else {
            Ok(UpsertOutcome::Created { source_id: new_id })
        }
    }

    /// Inserts a batch of chunks for one Source in a single transaction,
    /// returning the assigned identifiers in input order.
    pub async fn insert_chunks(
        &self,
        source_id: &str,
        chunks: &[NewChunk],
    ) -> CoreResult<Vec<i64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let metadata_json = chunk.metadata.to_string();
            let result = sqlx::query(
                "INSERT INTO chunks (source_id, ordinal, text, context_prefix, metadata_json, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(source_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(&chunk.context_prefix)
            .bind(&metadata_json)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

            ids.push(result.last_insert_rowid());
        }

        tx.commit()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(ids)
    }

    /// Idempotent; creates the model-specific vector table if absent.
    /// Dimension mismatch against an existing table is fatal.
    pub async fn ensure_vector_index(&self, model: &str, dimension: usize) -> CoreResult<()> {
        let slug = model_slug(model);
        let table = format!("vec_chunks_{slug}");
        let meta_table = format!("{table}_meta");

        let exists = sqlx::query("SELECT name FROM sqlite_master WHERE name = ?")
            .bind(&table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
            .is_some();

        if exists {
            let row = sqlx::query(&format!("SELECT dimension FROM {meta_table} LIMIT 1"))
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
            if let Some(row) = row {
                let existing_dim: i64 = row.get("dimension");
                if existing_dim as usize != dimension {
                    return Err(CoreError::SchemaMismatch {
                        configured: model.to_string(),
                    });
                }
            }
            return Ok(());
        }

        let create_vec = format!(
            "CREATE TABLE {table} (chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE, vector BLOB NOT NULL)"
        );
        let create_meta = format!("CREATE TABLE {meta_table} (dimension INTEGER NOT NULL)");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        sqlx::query(&create_vec)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        sqlx::query(&create_meta)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        sqlx::query(&format!("INSERT INTO {meta_table} (dimension) VALUES (?)"))
            .bind(dimension as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        tracing::info!(model, dimension, "created vector index");
        Ok(())
    }

    /// Inserts `(chunk_id, vector)` into the model-specific index. The
    /// chunk identifier must already exist.
    pub async fn write_vector(&self, model: &str, chunk_id: i64, vector: &[f32]) -> CoreResult<()> {
        let known = sqlx::query("SELECT id FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
            .is_some();
        if !known {
            return Err(CoreError::StoreIntegrity(format!(
                "write_vector: unknown chunk id {chunk_id}"
            )));
        }

        let table = format!("vec_chunks_{}", model_slug(model));
        let blob = vec_to_blob(vector);
        sqlx::query(&format!(
            "INSERT INTO {table} (chunk_id, vector) VALUES (?, ?) \
             ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector"
        ))
        .bind(chunk_id)
        .bind(blob)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(())
    }

    /// `text = context_prefix + "\n\n" + chunk_text`.
    pub async fn write_fts(&self, chunk_id: i64, text: &str) -> CoreResult<()> {
        let known = sqlx::query("SELECT id FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
            .is_some();
        if !known {
            return Err(CoreError::StoreIntegrity(format!(
                "write_fts: unknown chunk id {chunk_id}"
            )));
        }

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, content) VALUES (?, ?)")
            .bind(chunk_id)
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(())
    }

    pub async fn search_bm25(&self, query: &str, top_k: usize) -> CoreResult<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT chunk_id, bm25(chunks_fts) AS rank FROM chunks_fts \
             WHERE chunks_fts MATCH ? ORDER BY rank LIMIT ?",
        )
        .bind(query)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let chunk_id: i64 = row.get("chunk_id");
                // bm25() is more-negative-is-better in SQLite; invert so a
                // higher score always means a better match, consistent with
                // the vector channel's similarity score.
                let rank: f64 = row.get("rank");
                ScoredChunk {
                    chunk_id,
                    score: (-rank) as f32,
                }
            })
            .collect())
    }

    /// Brute-force cosine similarity over the model-specific vector table;
    /// there is no external vector-index extension in the dependency stack.
    pub async fn search_vector(
        &self,
        model: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> CoreResult<Vec<ScoredChunk>> {
        let table = format!("vec_chunks_{}", model_slug(model));
        let exists = sqlx::query("SELECT name FROM sqlite_master WHERE name = ?")
            .bind(&table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
            .is_some();
        if !exists {
            return Err(CoreError::SchemaMismatch {
                configured: model.to_string(),
            });
        }

        let rows = sqlx::query(&format!("SELECT chunk_id, vector FROM {table}"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        let mut scored: Vec<ScoredChunk> = rows
            .into_iter()
            .map(|row| {
                let chunk_id: i64 = row.get("chunk_id");
                let blob: Vec<u8> = row.get("vector");
                let vector = blob_to_vec(&blob);
                let score = cosine_similarity(query_vector, &vector);
                ScoredChunk { chunk_id, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    pub async fn hydrate(&self, chunk_ids: &[i64]) -> CoreResult<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = chunk_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT c.id, c.source_id, s.path AS source_path, c.ordinal, c.text, \
                    c.context_prefix, c.metadata_json, c.created_at \
             FROM chunks c JOIN sources s ON s.id = c.source_id \
             WHERE c.id IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql);
        for id in chunk_ids {
            q = q.bind(id);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        let mut by_id = std::collections::HashMap::new();
        for row in rows {
            let id: i64 = row.get("id");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Value = serde_json::from_str(&metadata_json).unwrap_or(Value::Null);
            let created_at: String = row.get("created_at");
            let chunk = Chunk {
                id,
                source_id: row.get("source_id"),
                source_path: row.get("source_path"),
                ordinal: row.get("ordinal"),
                text: row.get("text"),
                context_prefix: row.get("context_prefix"),
                metadata,
                created_at: created_at
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
            };
            by_id.insert(id, chunk);
        }

        Ok(chunk_ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }

    pub async fn upsert_summary(&self, source_id: &str, summary_text: &str) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO source_summaries (source_id, summary_text, generated_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(source_id) DO UPDATE SET summary_text = excluded.summary_text, \
             generated_at = excluded.generated_at",
        )
        .bind(source_id)
        .bind(summary_text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        Ok(())
    }

    pub async fn fetch_summary(&self, source_id: &str) -> CoreResult<Option<SourceSummary>> {
        let row = sqlx::query(
            "SELECT source_id, summary_text, generated_at FROM source_summaries WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(row.map(|row| {
            let generated_at: String = row.get("generated_at");
            SourceSummary {
                source_id: row.get("source_id"),
                summary_text: row.get("summary_text"),
                generated_at: generated_at.parse().unwrap_or_else(|_| Utc::now()),
            }
        }))
    }

    pub async fn fetch_source(&self, source_id: &str) -> CoreResult<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, path, content_hash, embedding_model, ingested_at FROM sources WHERE id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(row.map(|row| {
            let ingested_at: String = row.get("ingested_at");
            Source {
                id: row.get("id"),
                path: row.get("path"),
                content_hash: row.get("content_hash"),
                embedding_model: row.get("embedding_model"),
                ingested_at: ingested_at.parse().unwrap_or_else(|_| Utc::now()),
            }
        }))
    }

    /// The Ingest Orchestrator's atomic commit (spec §4.4 step 9): purges
    /// the prior revision if any, then inserts the Source row, every chunk,
    /// its vector entry, its full-text entry, and the summary, all in a
    /// single transaction. On any failure none of it is visible after
    /// restart — this is what makes the orchestrator's digest-dedup-only
    /// recovery model sound without checkpointing.
    pub async fn commit_ingest(&self, input: IngestCommit<'_>) -> CoreResult<String> {
        let table = format!("vec_chunks_{}", model_slug(input.embedding_model));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        if let Some(old_id) = input.replacing {
            purge_tx(&mut tx, old_id)
                .await
                .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        }

        let new_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sources (id, path, content_hash, embedding_model, ingested_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new_id)
        .bind(input.path)
        .bind(input.digest)
        .bind(input.embedding_model)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        for chunk in input.chunks {
            let metadata_json = chunk.new_chunk.metadata.to_string();
            let result = sqlx::query(
                "INSERT INTO chunks (source_id, ordinal, text, context_prefix, metadata_json, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&new_id)
            .bind(chunk.new_chunk.ordinal)
            .bind(&chunk.new_chunk.text)
            .bind(&chunk.new_chunk.context_prefix)
            .bind(&metadata_json)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
            let chunk_id = result.last_insert_rowid();

            let blob = vec_to_blob(&chunk.vector);
            sqlx::query(&format!("INSERT INTO {table} (chunk_id, vector) VALUES (?, ?)"))
                .bind(chunk_id)
                .bind(blob)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, content) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(&chunk.fts_text)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        }

        if let Some(summary) = input.summary {
            sqlx::query(
                "INSERT INTO source_summaries (source_id, summary_text, generated_at) VALUES (?, ?, ?)",
            )
            .bind(&new_id)
            .bind(summary)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;

        Ok(new_id)
    }

    /// Cascades to chunks, vector-index rows (via `ON DELETE CASCADE`), FTS
    /// rows, and the summary, all in one transaction.
    pub async fn purge_source(&self, source_id: &str) -> CoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        purge_tx(&mut tx, source_id)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
        Ok(())
    }

    /// Read-only counts used by `ragweave-cli`'s `stats` reporting: document
    /// and chunk totals, plus per-model vector index row counts.
    pub async fn stats(&self) -> CoreResult<crate::stats::StoreStats> {
        let source_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM sources")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
            .get("c");
        let chunk_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
            .get("c");

        let vector_tables: Vec<String> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'vec_chunks_%' \
             AND name NOT LIKE '%_meta'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
        .into_iter()
        .map(|row| row.get("name"))
        .collect();

        let mut vector_index_sizes = Vec::with_capacity(vector_tables.len());
        for table in vector_tables {
            let count: i64 = sqlx::query(&format!("SELECT COUNT(*) AS c FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?
                .get("c");
            vector_index_sizes.push((table, count));
        }

        Ok(crate::stats::StoreStats {
            source_count,
            chunk_count,
            vector_index_sizes,
        })
    }
}

/// Shared purge logic used both by `upsert_source`'s replace path and the
/// standalone `purge_source` operation. FTS rows must be deleted explicitly
/// (no foreign key on a virtual table); vector tables are per-model and are
/// swept by chunk id since `ON DELETE CASCADE` only reaches tables declared
/// with a real foreign key to `chunks`.
async fn purge_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_id: &str,
) -> Result<(), sqlx::Error> {
    let chunk_ids: Vec<i64> = sqlx::query("SELECT id FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|row| row.get("id"))
        .collect();

    for chunk_id in &chunk_ids {
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut **tx)
            .await?;
    }

    sqlx::query("DELETE FROM source_summaries WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    // Deleting the source cascades to chunks (ON DELETE CASCADE), which in
    // turn cascades to every vec_chunks_<slug> table via its own foreign key.
    sqlx::query("DELETE FROM sources WHERE id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run(&pool).await.unwrap();
        Repository::new(pool)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_same_digest() {
        let repo = repo().await;
        let first = repo.upsert_source("a.txt", "deadbeef", "openai/x").await.unwrap();
        assert!(matches!(first, UpsertOutcome::Created { .. }));

        let second = repo.upsert_source("a.txt", "deadbeef", "openai/x").await.unwrap();
        assert!(second.is_noop());
        assert_eq!(first.source_id(), second.source_id());
    }

    #[tokio::test]
    async fn different_digest_purges_and_replaces() {
        let repo = repo().await;
        let first = repo.upsert_source("a.txt", "hash1", "openai/x").await.unwrap();
        let chunks = vec![NewChunk {
            ordinal: 0,
            text: "hello".into(),
            context_prefix: String::new(),
            metadata: Value::Null,
        }];
        let ids = repo.insert_chunks(first.source_id(), &chunks).await.unwrap();
        assert_eq!(ids.len(), 1);

        let second = repo.upsert_source("a.txt", "hash2", "openai/x").await.unwrap();
        assert!(matches!(second, UpsertOutcome::Replaced { .. }));
        assert_ne!(first.source_id(), second.source_id());

        let remaining = sqlx::query("SELECT COUNT(*) AS c FROM chunks")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        let count: i64 = remaining.get("c");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn commit_ingest_is_atomic_and_hydratable() {
        let repo = repo().await;
        repo.ensure_vector_index("openai/x", 2).await.unwrap();

        let decision = repo.peek_dedup("a.txt", "hash1").await.unwrap();
        assert_eq!(decision, DedupDecision::New);

        let chunks = vec![PreparedChunk {
            new_chunk: NewChunk {
                ordinal: 0,
                text: "hello".into(),
                context_prefix: "ctx".into(),
                metadata: Value::Null,
            },
            vector: vec![0.1, 0.2],
            fts_text: "ctx\n\nhello".into(),
        }];

        let source_id = repo
            .commit_ingest(IngestCommit {
                path: "a.txt",
                digest: "hash1",
                embedding_model: "openai/x",
                replacing: None,
                chunks: &chunks,
                summary: Some("a short summary"),
            })
            .await
            .unwrap();

        let again = repo.peek_dedup("a.txt", "hash1").await.unwrap();
        assert_eq!(again, DedupDecision::AlreadyPresent { source_id: source_id.clone() });

        let fts = repo.search_bm25("hello", 5).await.unwrap();
        assert_eq!(fts.len(), 1);

        let summary = repo.fetch_summary(&source_id).await.unwrap();
        assert_eq!(summary.unwrap().summary_text, "a short summary");
    }

    #[tokio::test]
    async fn vector_write_rejects_unknown_chunk() {
        let repo = repo().await;
        repo.ensure_vector_index("openai/x", 3).await.unwrap();
        let result = repo.write_vector("openai/x", 999, &[0.1, 0.2, 0.3]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ensure_vector_index_rejects_dimension_mismatch() {
        let repo = repo().await;
        repo.ensure_vector_index("openai/x", 3).await.unwrap();
        let result = repo.ensure_vector_index("openai/x", 4).await;
        assert!(matches!(result, Err(CoreError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn purge_removes_fts_and_vector_rows() {
        let repo = repo().await;
        let outcome = repo.upsert_source("a.txt", "h1", "openai/x").await.unwrap();
        let ids = repo
            .insert_chunks(
                outcome.source_id(),
                &[NewChunk {
                    ordinal: 0,
                    text: "hi".into(),
                    context_prefix: String::new(),
                    metadata: Value::Null,
                }],
            )
            .await
            .unwrap();
        repo.ensure_vector_index("openai/x", 2).await.unwrap();
        repo.write_vector("openai/x", ids[0], &[0.1, 0.2]).await.unwrap();
        repo.write_fts(ids[0], "hi").await.unwrap();

        repo.purge_source(outcome.source_id()).await.unwrap();

        let fts_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM chunks_fts")
            .fetch_one(repo.pool())
            .await
            .unwrap()
            .get("c");
        assert_eq!(fts_count, 0);

        let vec_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM vec_chunks_openai_x")
            .fetch_one(repo.pool())
            .await
            .unwrap()
            .get("c");
        assert_eq!(vec_count, 0);
    }
}
