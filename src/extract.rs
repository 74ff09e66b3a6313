//! Structured extraction adapter.
//!
//! Invokes the external drawing conversion tool with the path to a raw
//! drawing and validates its JSON output against the minimal contract this
//! pipeline depends on: the required top-level sections must be present and
//! the declared schema version must be one this crate understands.
//!
//! Validation failures are typed ([`ExtractError`]) so the ingestion
//! pipeline can record the extraction artifact as failed and skip the rest
//! of that document cleanly, without affecting sibling documents.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::drawing::StructuredDocument;

/// Schema versions this pipeline understands.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0", "1.1"];

/// Top-level sections the structured document must declare.
pub const REQUIRED_SECTIONS: &[&str] = &[
    "file",
    "schema_version",
    "header",
    "layers",
    "entities",
    "blocks",
    "summary",
    "title_block",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("conversion tool not found or not executable: {0}")]
    ToolUnavailable(String),
    #[error("conversion tool exited with code {code:?}: {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },
    #[error("conversion tool timed out after {0}s")]
    Timeout(u64),
    #[error("conversion tool emitted malformed output: {0}")]
    MalformedOutput(String),
    #[error("structured document is missing required section '{0}'")]
    MissingRequiredSection(String),
    #[error("unsupported schema version '{found}' (supported: {supported})")]
    SchemaMismatch { found: String, supported: String },
}

/// Run the external conversion tool on a drawing and return the validated
/// structured document.
pub async fn run_extraction(
    config: &ExtractionConfig,
    drawing_path: &Path,
) -> Result<StructuredDocument, ExtractError> {
    info!(
        tool = %config.tool_path,
        input = %drawing_path.display(),
        "running structured extraction"
    );

    let child = Command::new(&config.tool_path)
        .arg(drawing_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|_| ExtractError::ToolUnavailable(config.tool_path.clone()))?;

    let output = match tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ExtractError::ToolFailed {
                code: None,
                stderr: e.to_string(),
            })
        }
        Err(_) => {
            warn!(
                input = %drawing_path.display(),
                timeout_secs = config.timeout_secs,
                "extraction timed out"
            );
            return Err(ExtractError::Timeout(config.timeout_secs));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(ExtractError::ToolFailed {
            code: output.status.code(),
            stderr,
        });
    }

    // Lossy decoding would smuggle replacement characters into chunk text,
    // so invalid UTF-8 is a contract violation like any other bad output.
    let stdout = String::from_utf8(output.stdout)
        .map_err(|e| ExtractError::MalformedOutput(format!("output is not UTF-8: {}", e)))?;
    parse_structured(&stdout)
}

/// Parse and validate the tool's JSON output.
///
/// Split from [`run_extraction`] so the contract can be tested without a
/// live tool.
pub fn parse_structured(raw: &str) -> Result<StructuredDocument, ExtractError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ExtractError::MalformedOutput(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ExtractError::MalformedOutput("top level is not an object".to_string()))?;

    for section in REQUIRED_SECTIONS {
        if !obj.contains_key(*section) {
            return Err(ExtractError::MissingRequiredSection(section.to_string()));
        }
    }

    let schema_version = obj
        .get("schema_version")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ExtractError::MalformedOutput("schema_version is not a string".to_string())
        })?;

    if !SUPPORTED_SCHEMA_VERSIONS.contains(&schema_version) {
        return Err(ExtractError::SchemaMismatch {
            found: schema_version.to_string(),
            supported: SUPPORTED_SCHEMA_VERSIONS.join(", "),
        });
    }

    serde_json::from_value(value).map_err(|e| ExtractError::MalformedOutput(e.to_string()))
}
