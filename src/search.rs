//! Hybrid search engine: metadata filtering composed with vector
//! similarity ranking.
//!
//! Filtering happens *before* ranking, so `k` always means k matching
//! results when enough exist — a filter never gets satisfied by nearer
//! chunks that fail the predicate. Similarity is cosine, normalized to
//! `[0, 1]` via `(1 + cos) / 2`; ties break by `source_ref` ascending so
//! result order is reproducible.

use std::sync::Arc;

use thiserror::Error;
use sqlx::SqlitePool;
use tracing::debug;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::{ChunkType, ScoredChunk};
use crate::store::{self, ChunkRow, ClauseRow};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query vector dimension {query} does not match stored vectors ({stored})")]
    DimensionMismatch { query: usize, stored: usize },
    #[error("failed to embed query: {0}")]
    QueryEmbedding(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Search boundary: one drawing or the whole corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Document(String),
    Corpus,
}

/// Metadata predicate applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub chunk_type: Option<ChunkType>,
    pub layer: Option<String>,
    pub category: Option<String>,
}

impl SearchFilters {
    /// Evaluate the metadata part of the predicate against one row.
    fn matches_metadata(&self, row: &ChunkRow) -> bool {
        if let Some(layer) = &self.layer {
            if row.metadata.get("layer").and_then(|v| v.as_str()) != Some(layer.as_str()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if row.metadata.get("category").and_then(|v| v.as_str()) != Some(category.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Map cosine similarity onto a `[0, 1]` score.
fn normalize_score(cosine: f32) -> f64 {
    ((1.0 + cosine as f64) / 2.0).clamp(0.0, 1.0)
}

/// Free-text hybrid search over stored chunks.
pub async fn search(
    pool: &SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    query: &str,
    filters: &SearchFilters,
    scope: &Scope,
    k: usize,
) -> Result<Vec<ScoredChunk>, SearchError> {
    let query_vec = embed_query(provider, query).await?;
    search_with_vector(pool, &query_vec, filters, scope, k).await
}

/// Search with an already-computed query vector. Used by `search` and by
/// the compliance pipeline (which reuses stored chunk vectors).
pub async fn search_with_vector(
    pool: &SqlitePool,
    query_vec: &[f32],
    filters: &SearchFilters,
    scope: &Scope,
    k: usize,
) -> Result<Vec<ScoredChunk>, SearchError> {
    let document_id = match scope {
        Scope::Document(id) => Some(id.as_str()),
        Scope::Corpus => None,
    };

    // Filter-then-rank: scope and chunk_type restrict the fetch, metadata
    // predicates drop rows before any similarity is computed.
    let rows = store::fetch_chunk_rows(pool, document_id, filters.chunk_type).await?;
    let candidates: Vec<&ChunkRow> = rows.iter().filter(|r| filters.matches_metadata(r)).collect();

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Mixed or mismatched dimensions are a hard error, never silently
    // truncated or padded.
    for row in &candidates {
        if row.dims != query_vec.len() {
            return Err(SearchError::DimensionMismatch {
                query: query_vec.len(),
                stored: row.dims,
            });
        }
    }

    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|row| ScoredChunk {
            chunk_id: row.id.clone(),
            document_id: row.document_id.clone(),
            chunk_type: row.chunk_type,
            label: row.label.clone(),
            source_ref: row.source_ref.clone(),
            text: row.text.clone(),
            metadata: row.metadata.clone(),
            score: normalize_score(cosine_similarity(query_vec, &row.vector)),
        })
        .collect();

    rank_and_truncate(&mut scored, k);
    debug!(results = scored.len(), k, "search complete");
    Ok(scored)
}

/// Sort by score descending, tie-break by source_ref ascending, take k.
fn rank_and_truncate(scored: &mut Vec<ScoredChunk>, k: usize) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_ref.cmp(&b.source_ref))
    });
    scored.truncate(k);
}

/// A ranked clause hit from the standards corpus.
#[derive(Debug, Clone)]
pub struct ScoredClause {
    pub clause_id: String,
    pub standard: String,
    pub clause_number: String,
    pub text: String,
    pub score: f64,
}

/// Top-k clause retrieval against the standards corpus, optionally
/// restricted to named standards.
pub async fn search_clauses(
    pool: &SqlitePool,
    query_vec: &[f32],
    standards: Option<&[String]>,
    k: usize,
) -> Result<Vec<ScoredClause>, SearchError> {
    let rows = store::fetch_clause_rows(pool, standards).await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    for row in &rows {
        if row.dims != query_vec.len() {
            return Err(SearchError::DimensionMismatch {
                query: query_vec.len(),
                stored: row.dims,
            });
        }
    }

    let mut scored: Vec<ScoredClause> = rows
        .iter()
        .map(|row: &ClauseRow| ScoredClause {
            clause_id: row.id.clone(),
            standard: row.standard.clone(),
            clause_number: row.clause_number.clone(),
            text: row.text.clone(),
            score: normalize_score(cosine_similarity(query_vec, &row.vector)),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.clause_id.cmp(&b.clause_id))
    });
    scored.truncate(k);
    Ok(scored)
}

async fn embed_query(
    provider: Arc<dyn EmbeddingProvider>,
    query: &str,
) -> Result<Vec<f32>, SearchError> {
    let vectors = provider
        .embed(&[query.to_string()])
        .await
        .map_err(|e| SearchError::QueryEmbedding(e.to_string()))?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| SearchError::QueryEmbedding("empty embedding response".to_string()))
}
