//! Chunking engine: structured drawing → ordered chunk drafts.
//!
//! Decomposes a [`StructuredDocument`] into labeled text units at five
//! granularities: whole document, summary, title-block fields, per-layer
//! aggregations, and per-entity chunks for text-bearing entities.
//!
//! Chunking is a pure, deterministic computation: the same document always
//! yields the same ordered sequence of drafts with the same `source_ref`
//! values, which is what makes reprocessing produce a comparable chunk set.

use serde_json::json;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::drawing::{Entity, StructuredDocument};
use crate::models::{ChunkDraft, ChunkType};

/// Inferred semantic category of a text-bearing entity.
///
/// Drives compliance target selection, so it must be deterministic:
/// entity type first, then text token matching.
pub fn entity_category(entity: &Entity) -> &'static str {
    let entity_type = entity.entity_type.to_lowercase();
    if entity_type.contains("dim") {
        return "dimension";
    }

    let text = entity.text.as_deref().unwrap_or("").to_lowercase();
    if ["±", "+/-", "tolerance", "tol."].iter().any(|t| text.contains(t)) {
        return "tolerance";
    }
    if ["⌀", "gd&t", "true position", "flatness", "perpendicularity", "concentricity"]
        .iter()
        .any(|t| text.contains(t))
    {
        return "gdt";
    }
    if ["thread", "tapped", "unc", "unf", "npt", "tpi"]
        .iter()
        .any(|t| text.contains(t))
    {
        return "thread";
    }
    if ["material", "matl", "steel", "aluminum", "alloy"]
        .iter()
        .any(|t| text.contains(t))
    {
        return "material";
    }
    if ["finish", "anodize", "plated", "painted", "coating"]
        .iter()
        .any(|t| text.contains(t))
    {
        return "finish";
    }
    "general"
}

/// Decompose a structured document into an ordered sequence of chunk
/// drafts. Order: whole document, summary, title block, layers, entities.
pub fn chunk_drawing(doc: &StructuredDocument, config: &ChunkingConfig) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();

    // Whole-document chunk is always produced, even for an empty drawing,
    // so every document has at least one retrievable unit.
    drafts.push(make_draft(
        ChunkType::WholeDocument,
        doc.file.name.clone(),
        "document".to_string(),
        render_whole_document(doc),
        json!({}),
        config,
    ));

    if let Some(summary) = doc.summary.as_ref().and_then(|s| s.best_text()) {
        drafts.push(make_draft(
            ChunkType::Summary,
            "summary".to_string(),
            "summary".to_string(),
            summary.to_string(),
            json!({}),
            config,
        ));
    }

    drafts.extend(title_block_drafts(doc, config));
    drafts.extend(layer_drafts(doc, config));
    drafts.extend(entity_drafts(doc, config));

    debug!(
        document = %doc.file.name,
        chunks = drafts.len(),
        "chunked structured document"
    );
    drafts
}

/// Canonical text rendering of the whole document.
fn render_whole_document(doc: &StructuredDocument) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Drawing: {} (schema {})\n",
        doc.file.name, doc.schema_version
    ));

    if !doc.layers.is_empty() {
        let names: Vec<&str> = doc.layers.iter().map(|l| l.name.as_str()).collect();
        out.push_str(&format!("Layers ({}): {}\n", doc.layers.len(), names.join(", ")));
    }

    if !doc.blocks.is_empty() {
        let names: Vec<&str> = doc.blocks.iter().map(|b| b.name.as_str()).collect();
        out.push_str(&format!("Blocks ({}): {}\n", doc.blocks.len(), names.join(", ")));
    }

    out.push_str(&format!("Entities: {}\n", doc.entities.len()));
    for entity in doc.entities.iter().filter(|e| e.has_text()) {
        out.push_str(&format!(
            "- [{}] {}\n",
            entity.entity_type,
            entity.text.as_deref().unwrap_or("")
        ));
    }

    if let Some(summary) = doc.summary.as_ref().and_then(|s| s.best_text()) {
        out.push_str("Summary: ");
        out.push_str(summary);
        out.push('\n');
    }

    out
}

/// One chunk per named title-block field; unnamed fields consolidated.
fn title_block_drafts(doc: &StructuredDocument, config: &ChunkingConfig) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let Some(tb) = &doc.title_block else {
        return drafts;
    };

    let mut unnamed = Vec::new();

    for field in &tb.fields {
        match field.name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => drafts.push(make_draft(
                ChunkType::TitleBlock,
                name.to_string(),
                format!("title_block/{}", name),
                format!("{}: {}", name, field.value),
                json!({ "field": name }),
                config,
            )),
            None => unnamed.push(field.value.as_str()),
        }
    }

    if !unnamed.is_empty() {
        drafts.push(make_draft(
            ChunkType::TitleBlock,
            "title block".to_string(),
            "title_block/fields".to_string(),
            unnamed.join("\n"),
            json!({}),
            config,
        ));
    }

    drafts
}

/// One chunk per layer: name, styling, and a bounded sample of entity
/// labels on that layer, in document order.
fn layer_drafts(doc: &StructuredDocument, config: &ChunkingConfig) -> Vec<ChunkDraft> {
    doc.layers
        .iter()
        .enumerate()
        .map(|(i, layer)| {
            let mut text = format!("Layer: {}", layer.name);
            if let Some(color) = &layer.color {
                text.push_str(&format!("\ncolor: {}", color));
            }
            if let Some(linetype) = &layer.linetype {
                text.push_str(&format!("\nlinetype: {}", linetype));
            }

            let on_layer: Vec<&Entity> = doc
                .entities
                .iter()
                .filter(|e| e.layer.as_deref() == Some(layer.name.as_str()))
                .collect();

            let sampled: Vec<String> = on_layer
                .iter()
                .filter(|e| e.has_text())
                .take(config.layer_entity_sample)
                .map(|e| {
                    format!("[{}] {}", e.entity_type, e.text.as_deref().unwrap_or(""))
                })
                .collect();

            if !sampled.is_empty() {
                text.push_str("\nentities:\n");
                text.push_str(&sampled.join("\n"));
            }

            make_draft(
                ChunkType::PerLayer,
                layer.name.clone(),
                format!("layer/{}", i),
                text,
                json!({
                    "layer": layer.name,
                    "entity_count": on_layer.len(),
                }),
                config,
            )
        })
        .collect()
}

/// One chunk per text-bearing entity. Purely geometric entities are not
/// chunked individually.
fn entity_drafts(doc: &StructuredDocument, config: &ChunkingConfig) -> Vec<ChunkDraft> {
    doc.entities
        .iter()
        .filter(|e| e.has_text())
        .map(|entity| {
            let mut text = entity.text.clone().unwrap_or_default();
            if let Some(value) = entity.value {
                text.push_str(&format!(" = {}", value));
            }
            if let Some(units) = &entity.units {
                text.push(' ');
                text.push_str(units);
            }

            let category = entity_category(entity);
            let mut metadata = json!({
                "entity_type": entity.entity_type,
                "category": category,
            });
            if let Some(layer) = &entity.layer {
                metadata["layer"] = json!(layer);
            }
            if let Some(handle) = &entity.handle {
                metadata["handle"] = json!(handle);
            }

            make_draft(
                ChunkType::PerEntity,
                format!("{} #{}", entity.entity_type, entity.index),
                format!("entity/{}", entity.index),
                text,
                metadata,
                config,
            )
        })
        .collect()
}

/// Build a draft, truncating over-long text at a char boundary and
/// flagging it rather than failing.
fn make_draft(
    chunk_type: ChunkType,
    label: String,
    source_ref: String,
    text: String,
    metadata: serde_json::Value,
    config: &ChunkingConfig,
) -> ChunkDraft {
    let (text, truncated) = if text.chars().count() > config.max_text_chars {
        (text.chars().take(config.max_text_chars).collect(), true)
    } else {
        (text, false)
    };

    ChunkDraft {
        chunk_type,
        label,
        source_ref,
        text,
        metadata,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawing::{
        Block, FileSection, Layer, Summary, TitleBlock, TitleBlockField,
    };

    fn entity(index: usize, entity_type: &str, layer: &str, text: Option<&str>) -> Entity {
        Entity {
            index,
            entity_type: entity_type.to_string(),
            layer: Some(layer.to_string()),
            handle: None,
            text: text.map(|t| t.to_string()),
            value: None,
            units: None,
            geometry: None,
        }
    }

    fn layer(name: &str) -> Layer {
        Layer {
            name: name.to_string(),
            color: Some("7".to_string()),
            linetype: None,
            frozen: None,
        }
    }

    fn sample_doc() -> StructuredDocument {
        StructuredDocument {
            file: FileSection {
                name: "bracket.dwg".into(),
                format: None,
                version: None,
            },
            schema_version: "1.0".into(),
            header: serde_json::json!({}),
            layers: vec![layer("DIM"), layer("NOTES"), layer("GEOM")],
            entities: (0..10)
                .map(|i| entity(i, "TEXT", "NOTES", Some(&format!("note {}", i))))
                .chain([entity(10, "LINE", "GEOM", None)])
                .collect(),
            blocks: vec![Block {
                name: "TITLE".into(),
                entity_indices: vec![],
            }],
            summary: Some(Summary {
                short: None,
                long: Some("A mounting bracket.".into()),
            }),
            title_block: None,
        }
    }

    #[test]
    fn test_scenario_counts_with_summary() {
        // 3 layers + 10 text entities + whole-document + summary = 15.
        let drafts = chunk_drawing(&sample_doc(), &ChunkingConfig::default());
        assert_eq!(drafts.len(), 15);
        assert_eq!(
            drafts
                .iter()
                .filter(|d| d.chunk_type == ChunkType::PerEntity)
                .count(),
            10
        );
        assert_eq!(
            drafts
                .iter()
                .filter(|d| d.chunk_type == ChunkType::PerLayer)
                .count(),
            3
        );
    }

    #[test]
    fn test_scenario_counts_without_summary() {
        let mut doc = sample_doc();
        doc.summary = None;
        let drafts = chunk_drawing(&doc, &ChunkingConfig::default());
        assert_eq!(drafts.len(), 14);
        assert!(!drafts.iter().any(|d| d.chunk_type == ChunkType::Summary));
    }

    #[test]
    fn test_empty_document_still_produces_whole_document_chunk() {
        let doc = StructuredDocument {
            file: FileSection {
                name: "empty.dwg".into(),
                format: None,
                version: None,
            },
            schema_version: "1.0".into(),
            header: serde_json::json!({}),
            layers: vec![],
            entities: vec![],
            blocks: vec![],
            summary: None,
            title_block: None,
        };
        let drafts = chunk_drawing(&doc, &ChunkingConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].chunk_type, ChunkType::WholeDocument);
        assert_eq!(drafts[0].source_ref, "document");
    }

    #[test]
    fn test_deterministic_source_refs() {
        let doc = sample_doc();
        let config = ChunkingConfig::default();
        let a: Vec<String> = chunk_drawing(&doc, &config)
            .into_iter()
            .map(|d| d.source_ref)
            .collect();
        let b: Vec<String> = chunk_drawing(&doc, &config)
            .into_iter()
            .map(|d| d.source_ref)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_layer_entity_sample_cap() {
        let mut doc = sample_doc();
        doc.entities = (0..200)
            .map(|i| entity(i, "TEXT", "NOTES", Some(&format!("note {}", i))))
            .collect();
        let config = ChunkingConfig {
            layer_entity_sample: 5,
            ..ChunkingConfig::default()
        };
        let drafts = chunk_drawing(&doc, &config);
        let notes_layer = drafts
            .iter()
            .find(|d| d.chunk_type == ChunkType::PerLayer && d.label == "NOTES")
            .unwrap();
        // First 5 in document order, no more.
        assert!(notes_layer.text.contains("note 0"));
        assert!(notes_layer.text.contains("note 4"));
        assert!(!notes_layer.text.contains("note 5\n"));
        assert_eq!(notes_layer.metadata["entity_count"], 200);
    }

    #[test]
    fn test_geometric_entities_not_chunked() {
        let mut doc = sample_doc();
        doc.entities = vec![
            entity(0, "LINE", "GEOM", None),
            entity(1, "CIRCLE", "GEOM", None),
            entity(2, "TEXT", "NOTES", Some("visible")),
        ];
        let drafts = chunk_drawing(&doc, &ChunkingConfig::default());
        let entity_chunks: Vec<_> = drafts
            .iter()
            .filter(|d| d.chunk_type == ChunkType::PerEntity)
            .collect();
        assert_eq!(entity_chunks.len(), 1);
        assert_eq!(entity_chunks[0].source_ref, "entity/2");
    }

    #[test]
    fn test_title_block_field_grouping() {
        let mut doc = sample_doc();
        doc.title_block = Some(TitleBlock {
            fields: vec![
                TitleBlockField {
                    name: Some("drawn_by".into()),
                    value: "JS".into(),
                },
                TitleBlockField {
                    name: Some("scale".into()),
                    value: "1:2".into(),
                },
                TitleBlockField {
                    name: None,
                    value: "REV A".into(),
                },
                TitleBlockField {
                    name: None,
                    value: "2024-03-01".into(),
                },
            ],
        });
        let drafts = chunk_drawing(&doc, &ChunkingConfig::default());
        let tb: Vec<_> = drafts
            .iter()
            .filter(|d| d.chunk_type == ChunkType::TitleBlock)
            .collect();
        // Two named fields + one consolidated unnamed chunk.
        assert_eq!(tb.len(), 3);
        assert_eq!(tb[0].source_ref, "title_block/drawn_by");
        assert_eq!(tb[0].metadata["field"], "drawn_by");
        assert_eq!(tb[2].source_ref, "title_block/fields");
        assert!(tb[2].text.contains("REV A"));
        assert!(tb[2].text.contains("2024-03-01"));
    }

    #[test]
    fn test_truncation_flag() {
        let mut doc = sample_doc();
        let long_note = "x".repeat(5000);
        doc.entities = vec![entity(0, "MTEXT", "NOTES", Some(&long_note))];
        let config = ChunkingConfig {
            max_text_chars: 100,
            ..ChunkingConfig::default()
        };
        let drafts = chunk_drawing(&doc, &config);
        let entity_chunk = drafts
            .iter()
            .find(|d| d.chunk_type == ChunkType::PerEntity)
            .unwrap();
        assert!(entity_chunk.truncated);
        assert_eq!(entity_chunk.text.chars().count(), 100);
    }

    #[test]
    fn test_entity_category_inference() {
        let case = |entity_type: &str, text: &str| {
            entity_category(&entity(0, entity_type, "L", Some(text)))
        };
        assert_eq!(case("DIMENSION_LINEAR", "12.5"), "dimension");
        assert_eq!(case("TEXT", "±0.05 on all holes"), "tolerance");
        assert_eq!(case("TEXT", "true position 0.1"), "gdt");
        assert_eq!(case("MTEXT", "M8 THREAD 1.25 pitch"), "thread");
        assert_eq!(case("TEXT", "MATL: 6061 ALUMINUM"), "material");
        assert_eq!(case("TEXT", "ANODIZE BLACK"), "finish");
        assert_eq!(case("TEXT", "see sheet 2"), "general");
    }

    #[test]
    fn test_entity_text_includes_value_and_units() {
        let mut e = entity(3, "DIMENSION_LINEAR", "DIM", Some("⌀"));
        e.value = Some(12.5);
        e.units = Some("mm".into());
        let mut doc = sample_doc();
        doc.entities = vec![e];
        let drafts = chunk_drawing(&doc, &ChunkingConfig::default());
        let chunk = drafts
            .iter()
            .find(|d| d.chunk_type == ChunkType::PerEntity)
            .unwrap();
        assert_eq!(chunk.text, "⌀ = 12.5 mm");
        assert_eq!(chunk.metadata["category"], "dimension");
    }
}
