//! # CadSentry CLI (`cads`)
//!
//! The `cads` binary is the primary interface for CadSentry. It provides
//! commands for database initialization, drawing ingestion, hybrid
//! search, standards corpus management, and compliance analysis.
//!
//! ## Usage
//!
//! ```bash
//! cads --config ./config/cads.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cads init` | Create the SQLite database and run schema migrations |
//! | `cads ingest <files>` | Extract, chunk, embed, and store drawing files |
//! | `cads get <id>` | Show a document's metadata, artifacts, and chunk count |
//! | `cads search "<query>"` | Hybrid search over stored chunks |
//! | `cads standards load <file>` | Load and embed a standards clause corpus |
//! | `cads standards list` | List loaded standards and clause counts |
//! | `cads analyze <id>` | Run compliance analysis for one document |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadsentry::compliance::{self, AnalyzeOptions, CancelToken};
use cadsentry::config::{self, Config};
use cadsentry::embedding::create_provider;
use cadsentry::models::ChunkType;
use cadsentry::reasoning::create_reasoner;
use cadsentry::search::{Scope, SearchFilters};
use cadsentry::store::DocumentLocks;
use cadsentry::{db, ingest, migrate, search, standards, store};

/// CadSentry CLI — a local-first knowledge base and compliance analyzer
/// for engineering drawings.
#[derive(Parser)]
#[command(
    name = "cads",
    about = "CadSentry — a knowledge base and compliance analyzer for engineering drawings",
    version,
    long_about = "CadSentry ingests CAD drawings through a structured extraction tool, chunks \
    and embeds the results into SQLite, and offers hybrid search plus retrieval-backed \
    compliance analysis against loaded engineering standards."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cads.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables.
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Ingest one or more drawing files.
    ///
    /// Each file is hashed, converted via the configured extraction tool,
    /// chunked, embedded, and stored. Re-ingesting identical bytes reuses
    /// the same document id and replaces derived rows.
    Ingest {
        /// Drawing files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show a document's metadata, artifact states, and chunk count.
    Get {
        /// Document id (SHA-256 content digest).
        id: String,
    },

    /// Hybrid search over stored chunks.
    ///
    /// Metadata filters apply before similarity ranking, so the limit
    /// always counts matching chunks.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to one document id.
        #[arg(long)]
        doc: Option<String>,

        /// Filter by chunk type (whole_document, summary, title_block,
        /// per_layer, per_entity).
        #[arg(long)]
        chunk_type: Option<String>,

        /// Filter by layer name.
        #[arg(long)]
        layer: Option<String>,

        /// Filter by annotation category (dimension, tolerance, gdt,
        /// thread, material, finish, general).
        #[arg(long)]
        category: Option<String>,

        /// Maximum number of results to return.
        #[arg(short = 'k', long)]
        limit: Option<i64>,
    },

    /// Manage the standards clause corpus.
    Standards {
        #[command(subcommand)]
        action: StandardsAction,
    },

    /// Run compliance analysis for an ingested document.
    ///
    /// Selects normative annotation chunks, retrieves candidate clauses
    /// for each, and judges them with the configured reasoning provider.
    Analyze {
        /// Document id (SHA-256 content digest).
        id: String,

        /// Restrict clause retrieval to a standard; repeatable.
        #[arg(long = "standard")]
        standards: Vec<String>,
    },
}

/// Standards corpus subcommands.
#[derive(Subcommand)]
enum StandardsAction {
    /// Load and embed a clause corpus from a JSON file.
    ///
    /// The file holds an array of `{standard, clause_number, category?,
    /// text}` objects. Reloading replaces clauses in place, keyed on
    /// `(standard, clause_number)`.
    Load {
        /// Path to the JSON clause file.
        path: PathBuf,
    },
    /// List loaded standards and their clause counts.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { files } => {
            run_ingest(&cfg, files).await?;
        }
        Commands::Get { id } => {
            run_get(&cfg, &id).await?;
        }
        Commands::Search {
            query,
            doc,
            chunk_type,
            layer,
            category,
            limit,
        } => {
            run_search(&cfg, &query, doc, chunk_type, layer, category, limit).await?;
        }
        Commands::Standards { action } => match action {
            StandardsAction::Load { path } => {
                let pool = db::connect(&cfg.db).await?;
                migrate::run_migrations(&pool).await?;
                let provider: Arc<_> = Arc::from(create_provider(&cfg.embedding)?);
                let summary = standards::load_standards(&pool, provider, &cfg.embedding, &path).await?;
                println!(
                    "Loaded {} clauses across {} standard(s): {}",
                    summary.clauses,
                    summary.standards.len(),
                    summary.standards.join(", ")
                );
            }
            StandardsAction::List => {
                let pool = db::connect(&cfg.db).await?;
                migrate::run_migrations(&pool).await?;
                let listing = store::list_standards(&pool).await?;
                if listing.is_empty() {
                    println!("No standards loaded.");
                } else {
                    for (standard, count) in listing {
                        println!("{}  ({} clauses)", standard, count);
                    }
                }
            }
        },
        Commands::Analyze { id, standards } => {
            run_analyze(&cfg, &id, standards).await?;
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.db).await?;
    migrate::run_migrations(&pool).await?;
    let provider: Arc<_> = Arc::from(create_provider(&cfg.embedding)?);
    let locks = DocumentLocks::new();

    let mut failures = 0usize;
    for file in &files {
        match ingest::run_ingest(&pool, &locks, Arc::clone(&provider), cfg, file).await {
            Ok(outcome) if outcome.fully_ok() => {
                println!(
                    "{}  {}  ({} chunks)",
                    outcome.document_id,
                    file.display(),
                    outcome.chunks_stored
                );
            }
            Ok(outcome) if !outcome.extracted => {
                failures += 1;
                println!(
                    "{}  {}  extraction FAILED (see `cads get {}`)",
                    outcome.document_id,
                    file.display(),
                    outcome.document_id
                );
            }
            Ok(outcome) => {
                failures += 1;
                println!(
                    "{}  {}  ({} chunks, {} embedding failures)",
                    outcome.document_id,
                    file.display(),
                    outcome.chunks_stored,
                    outcome.embed_failures
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {:#}", file.display(), e);
            }
        }
    }

    if failures > 0 {
        println!("{}/{} file(s) had problems.", failures, files.len());
    }
    Ok(())
}

async fn run_get(cfg: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.db).await?;
    migrate::run_migrations(&pool).await?;

    let Some(view) = store::get_document(&pool, id).await? else {
        println!("Document not found: {}", id);
        return Ok(());
    };

    println!("id:             {}", view.document.id);
    println!("file:           {}", view.document.source_filename);
    println!(
        "schema_version: {}",
        view.document.schema_version.as_deref().unwrap_or("-")
    );
    println!("chunks:         {}", view.chunk_count);
    println!("artifacts:");
    for artifact in &view.artifacts {
        let detail = artifact
            .error
            .as_deref()
            .or(artifact.locator.as_deref())
            .unwrap_or("");
        println!("  {:12} {:8} {}", artifact.kind, artifact.status.as_str(), detail);
    }
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    doc: Option<String>,
    chunk_type: Option<String>,
    layer: Option<String>,
    category: Option<String>,
    limit: Option<i64>,
) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.db).await?;
    migrate::run_migrations(&pool).await?;
    let provider: Arc<_> = Arc::from(create_provider(&cfg.embedding)?);

    let chunk_type = match chunk_type.as_deref() {
        Some(s) => Some(
            ChunkType::parse(s)
                .ok_or_else(|| anyhow::anyhow!("unknown chunk type: {}", s))?,
        ),
        None => None,
    };
    let filters = SearchFilters {
        chunk_type,
        layer,
        category,
    };
    let scope = match doc {
        Some(id) => Scope::Document(id),
        None => Scope::Corpus,
    };
    let k = limit.unwrap_or(cfg.retrieval.final_limit).max(1) as usize;

    let results = search::search(&pool, provider, query, &filters, &scope, k).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} {} ({})",
            i + 1,
            hit.score,
            &hit.document_id[..12.min(hit.document_id.len())],
            hit.source_ref,
            hit.chunk_type.as_str()
        );
        println!("   {}", snippet(&hit.text, 160));
    }
    Ok(())
}

async fn run_analyze(cfg: &Config, id: &str, standard_names: Vec<String>) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.db).await?;
    migrate::run_migrations(&pool).await?;
    let reasoner: Arc<_> = Arc::from(create_reasoner(&cfg.reasoning)?);

    let options = AnalyzeOptions {
        standards: standard_names,
    };
    let cancel = CancelToken::new();
    let report =
        compliance::analyze_document(&pool, reasoner, &cfg.compliance, id, &options, &cancel)
            .await?;

    println!("run:      {}", report.run_id);
    println!("document: {}", report.document_id);
    for (severity, count) in report.severity_counts() {
        if count > 0 {
            println!("{:15} {}", severity.as_str(), count);
        }
    }
    if report.findings.is_empty() {
        println!("No normative annotations found to analyze.");
        return Ok(());
    }
    println!();
    for finding in &report.findings {
        println!(
            "[{}] {} — {}",
            finding.severity.as_str(),
            finding.chunk_ref.source_ref,
            snippet(&finding.explanation, 200)
        );
        for clause in &finding.clause_refs {
            println!("    cites {} {}", clause.standard, clause.clause_number);
        }
        if let Some(fix) = &finding.suggested_fix {
            println!("    fix: {}", snippet(fix, 200));
        }
    }
    Ok(())
}

/// Single-line preview of chunk or finding text for terminal display.
fn snippet(text: &str, max_chars: usize) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= max_chars {
        return line;
    }
    let cut: String = line.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
