//! Retrieval store: SQLite persistence for documents, artifacts, chunks,
//! and standards clauses.
//!
//! Two invariants live here:
//! - a document's chunk set is replaced in one transaction (readers see
//!   the old set or the new set, never a mix);
//! - artifact recording is idempotent, and a failure never overwrites a
//!   prior success unless explicitly forced.
//!
//! Per-document write serialization is provided by [`DocumentLocks`]:
//! at most one reprocessing of a given document at a time, while different
//! documents proceed unconstrained.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{
    ArtifactKind, ArtifactRecord, ArtifactStatus, Chunk, ChunkType, Document, StandardsClause,
};

/// Per-document async locks serializing writes.
#[derive(Default)]
pub struct DocumentLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for one document id, creating it on first use.
    pub async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(document_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Insert the document if it does not exist. Idempotent: re-ingesting
/// identical bytes keeps the original row and `created_at`.
pub async fn upsert_document(
    pool: &SqlitePool,
    document_id: &str,
    source_filename: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO documents (id, source_filename, schema_version, created_at)
        VALUES (?, ?, NULL, ?)
        ON CONFLICT(id) DO UPDATE SET source_filename = excluded.source_filename
        "#,
    )
    .bind(document_id)
    .bind(source_filename)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_schema_version(
    pool: &SqlitePool,
    document_id: &str,
    schema_version: &str,
) -> Result<()> {
    sqlx::query("UPDATE documents SET schema_version = ? WHERE id = ?")
        .bind(schema_version)
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the state of one derived artifact.
///
/// Idempotent: re-recording the same success is a no-op, and a failure
/// does not erase a prior success unless `force` is set.
pub async fn record_artifact(
    pool: &SqlitePool,
    document_id: &str,
    kind: ArtifactKind,
    status: ArtifactStatus,
    locator: Option<&str>,
    error: Option<&str>,
    force: bool,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    if force {
        sqlx::query(
            r#"
            INSERT INTO artifacts (document_id, kind, status, locator, error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, kind) DO UPDATE SET
                status = excluded.status,
                locator = excluded.locator,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document_id)
        .bind(kind.as_str())
        .bind(status.as_str())
        .bind(locator)
        .bind(error)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(());
    }

    // Success is sticky: a non-forced pending or failed write never
    // clobbers a recorded ok, because the ok's derived rows still stand.
    sqlx::query(
        r#"
        INSERT INTO artifacts (document_id, kind, status, locator, error, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(document_id, kind) DO UPDATE SET
            status = excluded.status,
            locator = excluded.locator,
            error = excluded.error,
            updated_at = excluded.updated_at
        WHERE NOT (artifacts.status = 'ok' AND excluded.status != 'ok')
        "#,
    )
    .bind(document_id)
    .bind(kind.as_str())
    .bind(status.as_str())
    .bind(locator)
    .bind(error)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace the entire chunk set for a document in one transaction.
///
/// All-or-nothing: a concurrent reader sees the previous set until the
/// commit, then the new set — never a mixture.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[Chunk],
    model: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        let blob = vec_to_blob(&chunk.embedding);
        sqlx::query(
            r#"
            INSERT INTO chunks
                (id, document_id, chunk_type, label, source_ref, text, metadata_json,
                 truncated, embedding, model, dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_type.as_str())
        .bind(&chunk.label)
        .bind(&chunk.source_ref)
        .bind(&chunk.text)
        .bind(chunk.metadata.to_string())
        .bind(chunk.truncated as i64)
        .bind(blob)
        .bind(model)
        .bind(chunk.embedding.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// A stored chunk row with its decoded vector, as fetched for ranking.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub document_id: String,
    pub chunk_type: ChunkType,
    pub label: String,
    pub source_ref: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub dims: usize,
    pub vector: Vec<f32>,
}

/// Fetch candidate chunk rows, restricted to an optional document scope
/// and chunk type before any ranking happens.
pub async fn fetch_chunk_rows(
    pool: &SqlitePool,
    document_id: Option<&str>,
    chunk_type: Option<ChunkType>,
) -> Result<Vec<ChunkRow>> {
    let mut sql = String::from(
        "SELECT id, document_id, chunk_type, label, source_ref, text, metadata_json, dims, embedding
         FROM chunks WHERE 1=1",
    );
    if document_id.is_some() {
        sql.push_str(" AND document_id = ?");
    }
    if chunk_type.is_some() {
        sql.push_str(" AND chunk_type = ?");
    }

    let mut query = sqlx::query(&sql);
    if let Some(doc) = document_id {
        query = query.bind(doc);
    }
    if let Some(ct) = chunk_type {
        query = query.bind(ct.as_str());
    }

    let rows = query.fetch_all(pool).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let chunk_type_str: String = row.get("chunk_type");
        let metadata_json: String = row.get("metadata_json");
        let blob: Vec<u8> = row.get("embedding");
        let dims: i64 = row.get("dims");
        out.push(ChunkRow {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_type: ChunkType::parse(&chunk_type_str)
                .ok_or_else(|| anyhow::anyhow!("unknown chunk_type in store: {}", chunk_type_str))?,
            label: row.get("label"),
            source_ref: row.get("source_ref"),
            text: row.get("text"),
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
            dims: dims as usize,
            vector: blob_to_vec(&blob),
        });
    }
    Ok(out)
}

/// Full document view: record plus artifact states and chunk count.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub document: Document,
    pub artifacts: Vec<ArtifactRecord>,
    pub chunk_count: i64,
}

pub async fn get_document(pool: &SqlitePool, document_id: &str) -> Result<Option<DocumentView>> {
    let row = sqlx::query(
        "SELECT id, source_filename, schema_version, created_at FROM documents WHERE id = ?",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let document = Document {
        id: row.get("id"),
        source_filename: row.get("source_filename"),
        schema_version: row.get("schema_version"),
        created_at: row.get("created_at"),
    };

    let artifact_rows = sqlx::query(
        "SELECT kind, status, locator, error, updated_at FROM artifacts
         WHERE document_id = ? ORDER BY kind",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    let mut artifacts = Vec::with_capacity(artifact_rows.len());
    for row in artifact_rows {
        let status_str: String = row.get("status");
        artifacts.push(ArtifactRecord {
            kind: row.get("kind"),
            status: ArtifactStatus::parse(&status_str)
                .ok_or_else(|| anyhow::anyhow!("unknown artifact status: {}", status_str))?,
            locator: row.get("locator"),
            error: row.get("error"),
            updated_at: row.get("updated_at"),
        });
    }

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;

    Ok(Some(DocumentView {
        document,
        artifacts,
        chunk_count,
    }))
}

/// Upsert standards clauses with their vectors. Clause ids are
/// content-derived, so reloading a corpus replaces in place.
pub async fn upsert_clauses(
    pool: &SqlitePool,
    clauses: &[(StandardsClause, Vec<f32>)],
    model: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for (clause, vector) in clauses {
        let blob = vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO standards_clauses
                (id, standard, clause_number, category, text, embedding, model, dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(standard, clause_number) DO UPDATE SET
                category = excluded.category,
                text = excluded.text,
                embedding = excluded.embedding,
                model = excluded.model,
                dims = excluded.dims
            "#,
        )
        .bind(&clause.id)
        .bind(&clause.standard)
        .bind(&clause.clause_number)
        .bind(&clause.category)
        .bind(&clause.text)
        .bind(blob)
        .bind(model)
        .bind(vector.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// A stored clause row with its decoded vector.
#[derive(Debug, Clone)]
pub struct ClauseRow {
    pub id: String,
    pub standard: String,
    pub clause_number: String,
    pub category: Option<String>,
    pub text: String,
    pub dims: usize,
    pub vector: Vec<f32>,
}

/// Fetch clause rows, optionally restricted to named standards.
pub async fn fetch_clause_rows(
    pool: &SqlitePool,
    standards: Option<&[String]>,
) -> Result<Vec<ClauseRow>> {
    let rows = sqlx::query(
        "SELECT id, standard, clause_number, category, text, dims, embedding FROM standards_clauses",
    )
    .fetch_all(pool)
    .await?;

    let mut out = Vec::new();
    for row in rows {
        let standard: String = row.get("standard");
        if let Some(filter) = standards {
            if !filter.is_empty() && !filter.iter().any(|s| s == &standard) {
                continue;
            }
        }
        let blob: Vec<u8> = row.get("embedding");
        let dims: i64 = row.get("dims");
        out.push(ClauseRow {
            id: row.get("id"),
            standard,
            clause_number: row.get("clause_number"),
            category: row.get("category"),
            text: row.get("text"),
            dims: dims as usize,
            vector: blob_to_vec(&blob),
        });
    }
    Ok(out)
}

/// Count clauses per standard, for `standards list`.
pub async fn list_standards(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT standard, COUNT(*) AS clause_count FROM standards_clauses
         GROUP BY standard ORDER BY standard",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("standard"), row.get("clause_count")))
        .collect())
}
