//! Ingestion pipeline: raw drawing file to searchable chunks.
//!
//! `run_ingest` owns the full path — identity, extraction, chunking,
//! embedding, storage — and records per-stage artifact state as it goes.
//! `ingest_structured` starts after extraction, so already-structured
//! documents (and tests) skip the external conversion tool.
//!
//! Failure semantics: an extraction or embedding failure is recorded as
//! a failed artifact and reflected in the returned outcome, not bubbled
//! up as an error. Only infrastructure faults (unreadable input, storage
//! errors) abort the call. Re-ingesting the same bytes resolves to the
//! same document id and replaces derived rows atomically, so no run ever
//! leaves stale chunks behind.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunker::chunk_drawing;
use crate::config::Config;
use crate::drawing::StructuredDocument;
use crate::embedding::EmbeddingProvider;
use crate::extract::run_extraction;
use crate::identity::compute_document_id_from_path;
use crate::models::{ArtifactKind, ArtifactStatus, Chunk};
use crate::pipeline::embed_drafts;
use crate::store::{self, DocumentLocks};

/// Summary of one ingest call, suitable for CLI display.
#[derive(Debug)]
pub struct IngestOutcome {
    pub document_id: String,
    pub extracted: bool,
    pub chunks_stored: usize,
    pub embed_failures: usize,
}

impl IngestOutcome {
    pub fn fully_ok(&self) -> bool {
        self.extracted && self.embed_failures == 0
    }
}

/// Ingest one drawing file end to end.
pub async fn run_ingest(
    pool: &SqlitePool,
    locks: &DocumentLocks,
    provider: Arc<dyn EmbeddingProvider>,
    config: &Config,
    path: &Path,
) -> Result<IngestOutcome> {
    let document_id = compute_document_id_from_path(path)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    // One writer per document id; concurrent ingests of the same bytes
    // serialize here instead of racing on derived rows.
    let _guard = locks.acquire(&document_id).await;

    store::upsert_document(pool, &document_id, &filename).await?;
    for kind in [
        ArtifactKind::Extraction,
        ArtifactKind::Chunks,
        ArtifactKind::Embeddings,
    ] {
        store::record_artifact(
            pool,
            &document_id,
            kind,
            ArtifactStatus::Pending,
            None,
            None,
            false,
        )
        .await?;
    }

    let structured = match run_extraction(&config.extraction, path).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(document_id = %document_id, error = %e, "extraction failed");
            store::record_artifact(
                pool,
                &document_id,
                ArtifactKind::Extraction,
                ArtifactStatus::Failed,
                None,
                Some(&e.to_string()),
                false,
            )
            .await?;
            return Ok(IngestOutcome {
                document_id,
                extracted: false,
                chunks_stored: 0,
                embed_failures: 0,
            });
        }
    };

    store::record_artifact(
        pool,
        &document_id,
        ArtifactKind::Extraction,
        ArtifactStatus::Ok,
        None,
        None,
        true,
    )
    .await?;
    store::set_schema_version(pool, &document_id, &structured.schema_version).await?;

    ingest_structured_locked(pool, provider, config, &document_id, &structured).await
}

/// Chunk, embed, and store an already-extracted document.
///
/// Only chunks whose embedding succeeded are persisted; sibling failures
/// are counted into the embeddings artifact so a later re-ingest can
/// repair the gap without losing what worked.
pub async fn ingest_structured(
    pool: &SqlitePool,
    locks: &DocumentLocks,
    provider: Arc<dyn EmbeddingProvider>,
    config: &Config,
    document_id: &str,
    structured: &StructuredDocument,
) -> Result<IngestOutcome> {
    // Same per-document serialization as `run_ingest`, so callers that
    // skip the conversion tool cannot race each other's artifact records.
    let _guard = locks.acquire(document_id).await;
    ingest_structured_locked(pool, provider, config, document_id, structured).await
}

async fn ingest_structured_locked(
    pool: &SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    config: &Config,
    document_id: &str,
    structured: &StructuredDocument,
) -> Result<IngestOutcome> {
    let drafts = chunk_drawing(structured, &config.chunking);
    let draft_count = drafts.len();

    let outcome = embed_drafts(Arc::clone(&provider), &config.embedding, &drafts).await?;
    let embed_failures = outcome.failures.len();

    let chunks: Vec<Chunk> = drafts
        .into_iter()
        .zip(outcome.vectors)
        .filter_map(|(draft, vector)| {
            vector.map(|embedding| Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_type: draft.chunk_type,
                label: draft.label,
                source_ref: draft.source_ref,
                text: draft.text,
                metadata: draft.metadata,
                truncated: draft.truncated,
                embedding,
            })
        })
        .collect();

    store::replace_chunks(pool, document_id, &chunks, provider.model_name()).await?;

    store::record_artifact(
        pool,
        document_id,
        ArtifactKind::Chunks,
        ArtifactStatus::Ok,
        Some(&format!("{} chunks", chunks.len())),
        None,
        true,
    )
    .await?;

    if embed_failures == 0 {
        store::record_artifact(
            pool,
            document_id,
            ArtifactKind::Embeddings,
            ArtifactStatus::Ok,
            Some(&format!("{} vectors", chunks.len())),
            None,
            true,
        )
        .await?;
    } else {
        store::record_artifact(
            pool,
            document_id,
            ArtifactKind::Embeddings,
            ArtifactStatus::Failed,
            Some(&format!("{} vectors", chunks.len())),
            Some(&format!(
                "{}/{} chunks failed embedding",
                embed_failures, draft_count
            )),
            // The chunk set was already replaced, so the prior ok no
            // longer describes what is stored.
            true,
        )
        .await?;
    }

    info!(
        document_id,
        chunks = chunks.len(),
        embed_failures,
        "document ingested"
    );

    Ok(IngestOutcome {
        document_id: document_id.to_string(),
        extracted: true,
        chunks_stored: chunks.len(),
        embed_failures,
    })
}
