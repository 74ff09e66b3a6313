//! Embedding pipeline: batching, bounded concurrency, partial-failure
//! isolation.
//!
//! Chunk drafts are grouped into provider batches bounded by a maximum
//! text count and an aggregate character budget, then dispatched
//! concurrently up to a configured limit. A batch that exhausts the
//! provider's retry budget fails as a unit: its chunks are reported as
//! failed and left without vectors, while sibling batches keep their
//! results. Chunks without vectors are never persisted — a zero vector
//! would silently corrupt similarity ranking.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::models::ChunkDraft;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding failed for chunk '{source_ref}': {reason}")]
    EmbeddingFailed { source_ref: String, reason: String },
}

/// One planned provider call: draft indices plus their texts.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub indices: Vec<usize>,
    pub texts: Vec<String>,
}

/// Result of embedding a document's drafts: a vector per draft index for
/// the batches that succeeded, and one [`EmbedError`] per chunk in batches
/// that did not.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failures: Vec<EmbedError>,
}

/// Group drafts into batches bounded by `batch_size` texts and
/// `max_batch_chars` aggregate characters. Deterministic: drafts stay in
/// input order and a draft larger than the whole character budget gets a
/// batch of its own (its text was already truncated by the chunker).
pub fn plan_batches(drafts: &[ChunkDraft], config: &EmbeddingConfig) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch {
        indices: Vec::new(),
        texts: Vec::new(),
    };
    let mut current_chars = 0usize;

    for (i, draft) in drafts.iter().enumerate() {
        let text_chars = draft.text.chars().count();
        let over_count = current.texts.len() >= config.batch_size;
        let over_budget = !current.texts.is_empty()
            && current_chars + text_chars > config.max_batch_chars;

        if over_count || over_budget {
            batches.push(std::mem::replace(
                &mut current,
                Batch {
                    indices: Vec::new(),
                    texts: Vec::new(),
                },
            ));
            current_chars = 0;
        }

        current.indices.push(i);
        current.texts.push(draft.text.clone());
        current_chars += text_chars;
    }

    if !current.texts.is_empty() {
        batches.push(current);
    }

    batches
}

/// Embed all drafts through the provider with bounded concurrency.
///
/// Returns one slot per input draft; `None` marks a chunk whose batch
/// exhausted retries.
pub async fn embed_drafts(
    provider: Arc<dyn EmbeddingProvider>,
    config: &EmbeddingConfig,
    drafts: &[ChunkDraft],
) -> Result<EmbedOutcome> {
    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; drafts.len()];
    let mut failures = Vec::new();

    if drafts.is_empty() {
        return Ok(EmbedOutcome { vectors, failures });
    }

    let batches = plan_batches(drafts, config);
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut set: JoinSet<(Batch, Result<Vec<Vec<f32>>>)> = JoinSet::new();
    // Task id to batch indices, so a task that dies without returning
    // still maps back to the chunks it carried.
    let mut in_flight: HashMap<tokio::task::Id, Vec<usize>> = HashMap::new();

    for batch in batches {
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let indices = batch.indices.clone();
        let handle = set.spawn(async move {
            // Never closed; the Err arm is unreachable but holding the
            // Result keeps the permit alive either way.
            let _permit = semaphore.acquire_owned().await;
            let result = provider.embed(&batch.texts).await;
            (batch, result)
        });
        in_flight.insert(handle.id(), indices);
    }

    while let Some(joined) = set.join_next_with_id().await {
        let (batch, result) = match joined {
            Ok((id, output)) => {
                in_flight.remove(&id);
                output
            }
            Err(join_err) => {
                // A panicked batch task fails as a unit, same as a
                // provider error; sibling batches keep their vectors.
                let indices = in_flight.remove(&join_err.id()).unwrap_or_default();
                warn!(chunks = indices.len(), error = %join_err, "embedding batch task failed");
                for index in indices {
                    failures.push(EmbedError::EmbeddingFailed {
                        source_ref: drafts[index].source_ref.clone(),
                        reason: format!("batch task failed: {}", join_err),
                    });
                }
                continue;
            }
        };
        match result {
            Ok(batch_vectors) if batch_vectors.len() == batch.indices.len() => {
                for (index, vector) in batch.indices.iter().zip(batch_vectors) {
                    vectors[*index] = Some(vector);
                }
            }
            Ok(batch_vectors) => {
                // Length contract violation: treat the whole batch as failed.
                warn!(
                    expected = batch.indices.len(),
                    got = batch_vectors.len(),
                    "provider returned wrong vector count for batch"
                );
                for index in &batch.indices {
                    failures.push(EmbedError::EmbeddingFailed {
                        source_ref: drafts[*index].source_ref.clone(),
                        reason: format!(
                            "provider returned {} vectors for {} texts",
                            batch_vectors.len(),
                            batch.indices.len()
                        ),
                    });
                }
            }
            Err(e) => {
                warn!(chunks = batch.indices.len(), error = %e, "embedding batch failed");
                for index in &batch.indices {
                    failures.push(EmbedError::EmbeddingFailed {
                        source_ref: drafts[*index].source_ref.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(EmbedOutcome { vectors, failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn draft(source_ref: &str, text: &str) -> ChunkDraft {
        ChunkDraft {
            chunk_type: ChunkType::PerEntity,
            label: source_ref.to_string(),
            source_ref: source_ref.to_string(),
            text: text.to_string(),
            metadata: serde_json::json!({}),
            truncated: false,
        }
    }

    fn config(batch_size: usize, max_batch_chars: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            max_batch_chars,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_plan_batches_respects_count_bound() {
        let drafts: Vec<ChunkDraft> = (0..10)
            .map(|i| draft(&format!("entity/{}", i), "text"))
            .collect();
        let batches = plan_batches(&drafts, &config(4, 100_000));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].indices, vec![0, 1, 2, 3]);
        assert_eq!(batches[2].indices, vec![8, 9]);
    }

    #[test]
    fn test_plan_batches_respects_char_budget() {
        let drafts = vec![
            draft("a", &"x".repeat(60)),
            draft("b", &"x".repeat(60)),
            draft("c", &"x".repeat(60)),
        ];
        let batches = plan_batches(&drafts, &config(64, 100));
        // 60 + 60 > 100, so each lands in its own batch.
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_plan_batches_oversize_single_text() {
        let drafts = vec![draft("big", &"x".repeat(500)), draft("small", "y")];
        let batches = plan_batches(&drafts, &config(64, 100));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].indices, vec![0]);
    }

    #[test]
    fn test_plan_batches_deterministic() {
        let drafts: Vec<ChunkDraft> = (0..25)
            .map(|i| draft(&format!("entity/{}", i), &"t".repeat(i * 7 % 40 + 1)))
            .collect();
        let c = config(8, 120);
        assert_eq!(plan_batches(&drafts, &c), plan_batches(&drafts, &c));
    }

    /// Embeds every text as a fixed vector; fails on a chosen call index.
    struct FlakyProvider {
        fail_on_call: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky-test"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on_call {
                anyhow::bail!("exhausted retries");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_drafts_all_succeed() {
        let drafts: Vec<ChunkDraft> = (0..5)
            .map(|i| draft(&format!("entity/{}", i), "t"))
            .collect();
        let provider = Arc::new(FlakyProvider {
            fail_on_call: None,
            calls: AtomicUsize::new(0),
        });
        let outcome = embed_drafts(provider, &config(2, 100_000), &drafts)
            .await
            .unwrap();
        assert!(outcome.failures.is_empty());
        assert!(outcome.vectors.iter().all(|v| v.is_some()));
    }

    #[tokio::test]
    async fn test_embed_drafts_partial_failure_isolated() {
        let drafts: Vec<ChunkDraft> = (0..6)
            .map(|i| draft(&format!("entity/{}", i), "t"))
            .collect();
        // Three batches of two; one of them fails.
        let provider = Arc::new(FlakyProvider {
            fail_on_call: Some(1),
            calls: AtomicUsize::new(0),
        });
        let mut cfg = config(2, 100_000);
        cfg.concurrency = 1; // deterministic call order
        let outcome = embed_drafts(provider, &cfg, &drafts).await.unwrap();

        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.vectors.iter().filter(|v| v.is_some()).count(), 4);
        // The failed batch's chunks are the ones without vectors.
        assert!(outcome.vectors[2].is_none());
        assert!(outcome.vectors[3].is_none());
    }

    /// Panics on a chosen call index, simulating a bug in a provider impl.
    struct PanickyProvider {
        panic_on_call: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for PanickyProvider {
        fn model_name(&self) -> &str {
            "panicky-test"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.panic_on_call {
                panic!("provider bug");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_drafts_panicked_batch_isolated() {
        let drafts: Vec<ChunkDraft> = (0..6)
            .map(|i| draft(&format!("entity/{}", i), "t"))
            .collect();
        let provider = Arc::new(PanickyProvider {
            panic_on_call: 1,
            calls: AtomicUsize::new(0),
        });
        let mut cfg = config(2, 100_000);
        cfg.concurrency = 1; // deterministic call order
        let outcome = embed_drafts(provider, &cfg, &drafts).await.unwrap();

        // The dead batch reports its two chunks; siblings keep vectors.
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.vectors.iter().filter(|v| v.is_some()).count(), 4);
        assert!(outcome.vectors[2].is_none());
        assert!(outcome.vectors[3].is_none());
    }

    #[tokio::test]
    async fn test_embed_drafts_empty_input() {
        let provider = Arc::new(FlakyProvider {
            fail_on_call: None,
            calls: AtomicUsize::new(0),
        });
        let outcome = embed_drafts(provider, &config(2, 100), &[]).await.unwrap();
        assert!(outcome.vectors.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
