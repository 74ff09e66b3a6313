//! Standards corpus loading.
//!
//! Clauses are loaded from a JSON file holding an array of
//! `{standard, clause_number, category?, text}` objects, embedded with the
//! configured provider, and upserted keyed on `(standard, clause_number)`
//! so reloading an updated file replaces text and vectors in place.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::models::StandardsClause;
use crate::store;

#[derive(Debug, Deserialize)]
struct ClauseInput {
    standard: String,
    clause_number: String,
    #[serde(default)]
    category: Option<String>,
    text: String,
}

/// Stable clause identity derived from its coordinates, not its text, so
/// a reworded clause keeps its id across reloads.
pub fn clause_id(standard: &str, clause_number: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(standard.as_bytes());
    hasher.update(b"\n");
    hasher.update(clause_number.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct LoadSummary {
    pub clauses: usize,
    pub standards: Vec<String>,
}

/// Load, embed, and upsert a clause corpus file.
///
/// Unlike chunk embedding, any provider failure here aborts the load:
/// a partially embedded standards corpus would silently skew retrieval
/// for every later compliance run.
pub async fn load_standards(
    pool: &SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    config: &EmbeddingConfig,
    path: &Path,
) -> Result<LoadSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read standards file {}", path.display()))?;
    let inputs: Vec<ClauseInput> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse standards file {}", path.display()))?;

    if inputs.is_empty() {
        bail!("standards file {} contains no clauses", path.display());
    }
    for (i, input) in inputs.iter().enumerate() {
        if input.standard.trim().is_empty()
            || input.clause_number.trim().is_empty()
            || input.text.trim().is_empty()
        {
            bail!(
                "clause #{} is missing standard, clause_number, or text",
                i + 1
            );
        }
    }

    let clauses: Vec<StandardsClause> = inputs
        .into_iter()
        .map(|input| StandardsClause {
            id: clause_id(&input.standard, &input.clause_number),
            standard: input.standard,
            clause_number: input.clause_number,
            category: input.category,
            text: input.text,
        })
        .collect();

    let mut embedded: Vec<(StandardsClause, Vec<f32>)> = Vec::with_capacity(clauses.len());
    for batch in clauses.chunks(config.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} clauses",
                vectors.len(),
                batch.len()
            );
        }
        for (clause, vector) in batch.iter().cloned().zip(vectors) {
            embedded.push((clause, vector));
        }
    }

    store::upsert_clauses(pool, &embedded, provider.model_name()).await?;

    let mut standards: Vec<String> = embedded
        .iter()
        .map(|(c, _)| c.standard.clone())
        .collect();
    standards.sort();
    standards.dedup();

    info!(
        clauses = embedded.len(),
        standards = standards.len(),
        "standards corpus loaded"
    );

    Ok(LoadSummary {
        clauses: embedded.len(),
        standards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_id_stable_across_text_changes() {
        let a = clause_id("ASME Y14.5", "7.2");
        let b = clause_id("ASME Y14.5", "7.2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_clause_id_separator_prevents_collisions() {
        // "AB" + "C" must not collide with "A" + "BC".
        assert_ne!(clause_id("AB", "C"), clause_id("A", "BC"));
    }

    #[test]
    fn test_clause_input_parsing() {
        let raw = r#"[
            {"standard": "ISO 2768", "clause_number": "m.1", "text": "General tolerances"},
            {"standard": "ASME Y14.5", "clause_number": "7.2", "category": "gdt", "text": "Datum references"}
        ]"#;
        let inputs: Vec<ClauseInput> = serde_json::from_str(raw).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].category.is_none());
        assert_eq!(inputs[1].category.as_deref(), Some("gdt"));
    }
}
