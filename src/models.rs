//! Core data models used throughout CadSentry.
//!
//! These types represent the documents, chunks, standards clauses, and
//! compliance findings that flow through the ingestion and retrieval
//! pipeline.

use serde::{Deserialize, Serialize};

/// Derived forms the pipeline produces for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Extraction,
    Chunks,
    Embeddings,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Extraction => "extraction",
            ArtifactKind::Chunks => "chunks",
            ArtifactKind::Embeddings => "embeddings",
        }
    }
}

/// State of one derived artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Ok,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Ok => "ok",
            ArtifactStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ArtifactStatus::Pending),
            "ok" => Some(ArtifactStatus::Ok),
            "failed" => Some(ArtifactStatus::Failed),
            _ => None,
        }
    }
}

/// Normalized document record stored in SQLite.
///
/// `id` is the lowercase SHA-256 hex digest of the raw drawing bytes, so
/// re-ingesting identical content resolves to the same row.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_filename: String,
    pub schema_version: Option<String>,
    pub created_at: i64,
}

/// One artifact state row for a document.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub kind: String,
    pub status: ArtifactStatus,
    pub locator: Option<String>,
    pub error: Option<String>,
    pub updated_at: i64,
}

/// Granularity of a chunk extracted from a structured drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    WholeDocument,
    Summary,
    TitleBlock,
    PerLayer,
    PerEntity,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::WholeDocument => "whole_document",
            ChunkType::Summary => "summary",
            ChunkType::TitleBlock => "title_block",
            ChunkType::PerLayer => "per_layer",
            ChunkType::PerEntity => "per_entity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whole_document" => Some(ChunkType::WholeDocument),
            "summary" => Some(ChunkType::Summary),
            "title_block" => Some(ChunkType::TitleBlock),
            "per_layer" => Some(ChunkType::PerLayer),
            "per_entity" => Some(ChunkType::PerEntity),
            _ => None,
        }
    }
}

/// A chunk produced by the chunking engine, before embedding.
///
/// Drafts carry everything except the vector. `source_ref` is a stable
/// structural locator back into the structured document (`layer/2`,
/// `entity/17`, ...) and is unique per `(document, chunk_type)`.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub chunk_type: ChunkType,
    pub label: String,
    pub source_ref: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub truncated: bool,
}

/// A fully materialized chunk: draft + identity + embedding vector.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_type: ChunkType,
    pub label: String,
    pub source_ref: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub truncated: bool,
    pub embedding: Vec<f32>,
}

/// One retrievable unit from a normative standards corpus.
#[derive(Debug, Clone)]
pub struct StandardsClause {
    pub id: String,
    pub standard: String,
    pub clause_number: String,
    pub category: Option<String>,
    pub text: String,
}

/// A search hit returned by the hybrid search engine.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_type: ChunkType,
    pub label: String,
    pub source_ref: String,
    pub text: String,
    pub metadata: serde_json::Value,
    /// Normalized similarity in [0, 1].
    pub score: f64,
}

/// Severity of a compliance finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Violation,
    AnalysisError,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Violation => "violation",
            Severity::AnalysisError => "analysis_error",
        }
    }
}

/// Verdict returned by the reasoning service for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Compliant,
    NonCompliant,
    Uncertain,
}

impl Verdict {
    /// Map a verdict onto finding severity.
    pub fn severity(&self) -> Severity {
        match self {
            Verdict::Compliant => Severity::Info,
            Verdict::Uncertain => Severity::Warning,
            Verdict::NonCompliant => Severity::Violation,
        }
    }
}

/// Back-reference from a finding to the chunk that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub source_ref: String,
    pub label: String,
}

/// Back-reference to a cited standards clause.
#[derive(Debug, Clone, Serialize)]
pub struct ClauseRef {
    pub clause_id: String,
    pub standard: String,
    pub clause_number: String,
}

/// One severity-tagged judgment linking a drawing chunk to cited clauses.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceFinding {
    pub document_id: String,
    pub chunk_ref: ChunkRef,
    pub severity: Severity,
    /// Ordered most-relevant-first.
    pub clause_refs: Vec<ClauseRef>,
    pub explanation: String,
    pub suggested_fix: Option<String>,
}

/// Full report produced by one compliance analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub run_id: String,
    pub document_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub findings: Vec<ComplianceFinding>,
}

impl ComplianceReport {
    /// Count findings per severity, in display order.
    pub fn severity_counts(&self) -> Vec<(Severity, usize)> {
        [
            Severity::Violation,
            Severity::Warning,
            Severity::Info,
            Severity::AnalysisError,
        ]
        .iter()
        .map(|s| (*s, self.findings.iter().filter(|f| f.severity == *s).count()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_type_roundtrip() {
        for ct in [
            ChunkType::WholeDocument,
            ChunkType::Summary,
            ChunkType::TitleBlock,
            ChunkType::PerLayer,
            ChunkType::PerEntity,
        ] {
            assert_eq!(ChunkType::parse(ct.as_str()), Some(ct));
        }
        assert_eq!(ChunkType::parse("nope"), None);
    }

    #[test]
    fn test_verdict_severity_mapping() {
        assert_eq!(Verdict::Compliant.severity(), Severity::Info);
        assert_eq!(Verdict::Uncertain.severity(), Severity::Warning);
        assert_eq!(Verdict::NonCompliant.severity(), Severity::Violation);
    }

    #[test]
    fn test_severity_counts() {
        let finding = |sev| ComplianceFinding {
            document_id: "d".into(),
            chunk_ref: ChunkRef {
                chunk_id: "c".into(),
                source_ref: "entity/0".into(),
                label: "e".into(),
            },
            severity: sev,
            clause_refs: vec![],
            explanation: String::new(),
            suggested_fix: None,
        };
        let report = ComplianceReport {
            run_id: "r".into(),
            document_id: "d".into(),
            started_at: 0,
            finished_at: 0,
            findings: vec![
                finding(Severity::Violation),
                finding(Severity::Info),
                finding(Severity::Info),
            ],
        };
        let counts = report.severity_counts();
        assert_eq!(counts[0], (Severity::Violation, 1));
        assert_eq!(counts[2], (Severity::Info, 2));
    }
}
