//! # CadSentry
//!
//! A local-first knowledge base and compliance analyzer for engineering
//! drawings.
//!
//! CadSentry ingests CAD drawing files through an external structured
//! extraction tool, chunks the structured output at several
//! granularities, embeds the chunks with a configurable provider, and
//! stores everything in SQLite. On top of that store it offers hybrid
//! (metadata + vector) search and a two-stage retrieval-then-judgment
//! compliance analysis against a loaded standards corpus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ DWG file │──▶│ dwg_to_json  │──▶│  Chunk+Embed │──▶│  SQLite   │
//! │ (sha256) │   │ (subprocess) │   │   pipeline   │   │  + BLOBs  │
//! └──────────┘   └──────────────┘   └─────────────┘   └────┬─────┘
//!                                                          │
//!                               ┌──────────────────────────┤
//!                               ▼                          ▼
//!                        ┌────────────┐            ┌────────────┐
//!                        │   Hybrid    │            │ Compliance │
//!                        │   search    │            │  analysis  │
//!                        └────────────┘            └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cads init                          # create database
//! cads ingest part-a113.dwg          # extract, chunk, embed, store
//! cads search "surface finish" --category finish
//! cads standards load din-iso.json   # load a clause corpus
//! cads analyze <document-id>         # run compliance analysis
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`identity`] | Content-addressed document identity |
//! | [`drawing`] | Structured drawing document model |
//! | [`extract`] | External conversion tool adapter |
//! | [`chunker`] | Multi-granularity chunking engine |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pipeline`] | Batched, concurrent embedding of chunk drafts |
//! | [`ingest`] | End-to-end ingestion pipeline |
//! | [`store`] | SQLite persistence and retrieval |
//! | [`search`] | Hybrid metadata + vector search |
//! | [`standards`] | Standards corpus loading |
//! | [`reasoning`] | Reasoning provider abstraction |
//! | [`compliance`] | Two-stage compliance analysis |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod compliance;
pub mod config;
pub mod db;
pub mod drawing;
pub mod embedding;
pub mod extract;
pub mod identity;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod reasoning;
pub mod search;
pub mod standards;
pub mod store;
