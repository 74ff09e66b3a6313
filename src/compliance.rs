//! Compliance analysis engine.
//!
//! A run walks four stages: select target chunks from the document,
//! retrieve candidate clauses for each target, judge each pairing with
//! the reasoning provider, aggregate into a [`ComplianceReport`].
//!
//! Judgments run concurrently under a semaphore. A failed judgment never
//! fails the run: it degrades to an `analysis_error` finding, so the
//! report always covers every selected target. Cancellation stops new
//! judgments from dispatching; in-flight ones finish and land in the
//! report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ComplianceConfig;
use crate::models::{
    ChunkRef, ChunkType, ClauseRef, ComplianceFinding, ComplianceReport, Severity, Verdict,
};
use crate::reasoning::{build_judgment_prompt, ReasoningProvider};
use crate::search::{self, ScoredClause};
use crate::store::{self, ChunkRow};

/// Annotation categories worth judging against standards. Geometric
/// fragments and free-prose notes produce noise, not findings.
const TARGET_CATEGORIES: [&str; 6] = [
    "dimension",
    "tolerance",
    "gdt",
    "thread",
    "material",
    "finish",
];

/// Options for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Restrict clause retrieval to these standards; empty means all.
    pub standards: Vec<String>,
}

/// Cooperative cancellation handle for a running analysis.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Pick the chunks of a document worth judging: per-entity chunks whose
/// inferred category is normative.
fn select_targets(rows: Vec<ChunkRow>) -> Vec<ChunkRow> {
    rows.into_iter()
        .filter(|row| {
            row.metadata
                .get("category")
                .and_then(|v| v.as_str())
                .map(|c| TARGET_CATEGORIES.contains(&c))
                .unwrap_or(false)
        })
        .collect()
}

/// Run a full compliance analysis for one ingested document.
pub async fn analyze_document(
    pool: &SqlitePool,
    reasoner: Arc<dyn ReasoningProvider>,
    config: &ComplianceConfig,
    document_id: &str,
    options: &AnalyzeOptions,
    cancel: &CancelToken,
) -> Result<ComplianceReport> {
    let run_id = Uuid::new_v4().to_string();
    let started_at = Utc::now().timestamp();

    store::get_document(pool, document_id)
        .await?
        .with_context(|| format!("document {} not found", document_id))?;

    let standards = store::list_standards(pool).await?;
    if standards.is_empty() {
        bail!("no standards clauses loaded; load a corpus before analyzing");
    }

    // Stage 1: select targets.
    let rows = store::fetch_chunk_rows(pool, Some(document_id), Some(ChunkType::PerEntity)).await?;
    let targets = select_targets(rows);
    info!(run_id = %run_id, document_id, targets = targets.len(), "analysis targets selected");

    if targets.is_empty() {
        return Ok(ComplianceReport {
            run_id,
            document_id: document_id.to_string(),
            started_at,
            finished_at: Utc::now().timestamp(),
            findings: Vec::new(),
        });
    }

    // Stage 2: retrieve candidate clauses per target, reusing each
    // chunk's stored vector so no re-embedding happens here.
    let standard_filter = if options.standards.is_empty() {
        None
    } else {
        Some(options.standards.as_slice())
    };
    let mut retrievals: Vec<(ChunkRow, Vec<ScoredClause>)> = Vec::with_capacity(targets.len());
    for target in targets {
        let clauses =
            search::search_clauses(pool, &target.vector, standard_filter, config.clause_top_k)
                .await
                .with_context(|| format!("clause retrieval failed for {}", target.source_ref))?;
        retrievals.push((target, clauses));
    }

    // Stage 3: judge, bounded by the configured concurrency.
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut join_set: JoinSet<(usize, ComplianceFinding)> = JoinSet::new();
    let mut findings: Vec<Option<ComplianceFinding>> = Vec::new();
    findings.resize_with(retrievals.len(), || None);

    for (i, (target, clauses)) in retrievals.into_iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(run_id = %run_id, "analysis cancelled; skipping remaining targets");
            findings[i] = Some(cancelled_finding(document_id, &target));
            continue;
        }

        let semaphore = Arc::clone(&semaphore);
        let reasoner = Arc::clone(&reasoner);
        let cancel = cancel.clone();
        let document_id = document_id.to_string();
        join_set.spawn(async move {
            // Holds a permit for the duration of the provider call.
            let _permit = semaphore.acquire_owned().await;
            // Tasks queued behind the semaphore re-check after waiting, so
            // a cancelled run issues no further provider calls.
            if cancel.is_cancelled() {
                return (i, cancelled_finding(&document_id, &target));
            }
            let finding = judge_target(reasoner, &document_id, &target, &clauses).await;
            (i, finding)
        });
    }

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((i, finding)) => findings[i] = Some(finding),
            Err(e) => warn!(run_id = %run_id, error = %e, "judgment task panicked"),
        }
    }

    // Stage 4: aggregate in target order.
    let findings: Vec<ComplianceFinding> = findings.into_iter().flatten().collect();
    let report = ComplianceReport {
        run_id,
        document_id: document_id.to_string(),
        started_at,
        finished_at: Utc::now().timestamp(),
        findings,
    };
    info!(
        run_id = %report.run_id,
        findings = report.findings.len(),
        "analysis complete"
    );
    Ok(report)
}

async fn judge_target(
    reasoner: Arc<dyn ReasoningProvider>,
    document_id: &str,
    target: &ChunkRow,
    clauses: &[ScoredClause],
) -> ComplianceFinding {
    let chunk_ref = ChunkRef {
        chunk_id: target.id.clone(),
        source_ref: target.source_ref.clone(),
        label: target.label.clone(),
    };

    if clauses.is_empty() {
        return ComplianceFinding {
            document_id: document_id.to_string(),
            chunk_ref,
            severity: Verdict::Uncertain.severity(),
            clause_refs: Vec::new(),
            explanation: "No candidate clauses retrieved for this annotation.".to_string(),
            suggested_fix: None,
        };
    }

    let category = target.metadata.get("category").and_then(|v| v.as_str());
    let prompt = build_judgment_prompt(&target.text, category, clauses);

    match reasoner.judge(&prompt, clauses.len()).await {
        Ok(judgment) => {
            // Cited clauses first, in the model's order; if it cited
            // nothing, fall back to retrieval order.
            let clause_refs: Vec<ClauseRef> = if judgment.cited.is_empty() {
                clauses.iter().map(clause_ref).collect()
            } else {
                judgment
                    .cited
                    .iter()
                    .filter_map(|&i| clauses.get(i).map(clause_ref))
                    .collect()
            };
            debug!(source_ref = %target.source_ref, verdict = ?judgment.verdict, "chunk judged");
            ComplianceFinding {
                document_id: document_id.to_string(),
                chunk_ref,
                severity: judgment.verdict.severity(),
                clause_refs,
                explanation: judgment.explanation,
                suggested_fix: judgment.suggested_fix,
            }
        }
        Err(e) => {
            warn!(source_ref = %target.source_ref, error = %e, "judgment failed");
            ComplianceFinding {
                document_id: document_id.to_string(),
                chunk_ref,
                severity: Severity::AnalysisError,
                clause_refs: clauses.iter().map(clause_ref).collect(),
                explanation: format!("Judgment failed: {}", e),
                suggested_fix: None,
            }
        }
    }
}

fn clause_ref(clause: &ScoredClause) -> ClauseRef {
    ClauseRef {
        clause_id: clause.clause_id.clone(),
        standard: clause.standard.clone(),
        clause_number: clause.clause_number.clone(),
    }
}

fn cancelled_finding(document_id: &str, target: &ChunkRow) -> ComplianceFinding {
    ComplianceFinding {
        document_id: document_id.to_string(),
        chunk_ref: ChunkRef {
            chunk_id: target.id.clone(),
            source_ref: target.source_ref.clone(),
            label: target.label.clone(),
        },
        severity: Severity::AnalysisError,
        clause_refs: Vec::new(),
        explanation: "Analysis cancelled before this annotation was judged.".to_string(),
        suggested_fix: None,
    }
}
