//! Typed model of the structured drawing document.
//!
//! This mirrors the versioned JSON contract emitted by the external
//! conversion tool: required top-level sections `file`, `schema_version`,
//! `header`, `layers`, `entities`, `blocks`, `summary`, `title_block`.
//! The schema is authoritative on the tool side; this crate only validates
//! the minimal contract it depends on (see `extract`).

use serde::{Deserialize, Serialize};

/// Full structured representation of one drawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub file: FileSection,
    pub schema_version: String,
    /// Raw header variables; passed through untyped.
    pub header: serde_json::Value,
    pub layers: Vec<Layer>,
    pub entities: Vec<Entity>,
    pub blocks: Vec<Block>,
    pub summary: Option<Summary>,
    pub title_block: Option<TitleBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSection {
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub linetype: Option<String>,
    #[serde(default)]
    pub frozen: Option<bool>,
}

/// One drawing entity. Only entities carrying a human-readable `text`
/// payload are chunked individually; purely geometric entities appear in
/// layer aggregations at most.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub index: usize,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub geometry: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    #[serde(default)]
    pub entity_indices: Vec<usize>,
}

/// High-level drawing summary produced upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub short: Option<String>,
    #[serde(default)]
    pub long: Option<String>,
}

impl Summary {
    /// Preferred summary text: long form, falling back to short.
    pub fn best_text(&self) -> Option<&str> {
        self.long
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.short.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleBlock {
    pub fields: Vec<TitleBlockField>,
}

/// One title-block field. `name` is absent when the upstream tool could
/// not label the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleBlockField {
    #[serde(default)]
    pub name: Option<String>,
    pub value: String,
}

impl Entity {
    /// True when the entity carries a non-empty human-readable text payload.
    pub fn has_text(&self) -> bool {
        self.text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}
