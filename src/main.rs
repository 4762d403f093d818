//! # Context Brief CLI (`cbrief`)
//!
//! ## Usage
//!
//! ```bash
//! cbrief --config ./config/brief.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cbrief init` | Create the SQLite database and run schema migrations |
//! | `cbrief ingest <file> --doc-id N` | Chunk, embed, and index a text file |
//! | `cbrief delete <doc-id>` | Remove a document and all of its points |
//! | `cbrief search "<query>"` | Semantic search over indexed passages |
//! | `cbrief context --owner U "<query>"` | Print an assembled context |
//! | `cbrief remember --owner U "<query>"` | Append a conversation record |
//! | `cbrief set-context --owner U <text>` | Replace the legacy user context |
//! | `cbrief status` | List documents and their index status |
//! | `cbrief serve` | Start the HTTP server |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use context_brief::config::{self, Config};
use context_brief::models::{ConversationAppend, IngestRequest};
use context_brief::services::Services;
use context_brief::{documents, logging, migrate, server};
use context_brief_core::models::{ContextKind, IndexStatus};

/// Context Brief: document retrieval and budgeted context assembly for
/// LLM prompts.
#[derive(Parser)]
#[command(name = "cbrief", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/brief.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a UTF-8 text file as one document.
    Ingest {
        /// File holding the extracted document text.
        path: PathBuf,

        /// Document id, below 1,000,000.
        #[arg(long)]
        doc_id: u64,

        /// Display name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Delete a document and every point derived from it.
    Delete { doc_id: u64 },

    /// Semantic search over indexed passages.
    Search {
        query: String,

        /// Defaults to `[retrieval].top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Assemble and print the context for an owner and query.
    Context {
        query: String,

        #[arg(long)]
        owner: String,

        /// Print the full JSON result including group reports.
        #[arg(long)]
        json: bool,
    },

    /// Record a conversation turn in the owner's history.
    Remember {
        query: String,

        #[arg(long)]
        owner: String,

        #[arg(long, default_value = "")]
        summary: String,

        #[arg(long, default_value = "chat")]
        kind: String,
    },

    /// Replace the owner's legacy background context.
    SetContext {
        /// Context text; use `--file` to read it from disk instead.
        content: Option<String>,

        #[arg(long)]
        owner: String,

        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,

        /// Stored kind: `text` or `document`.
        #[arg(long, default_value = "text")]
        kind: String,
    },

    /// List documents and their index status.
    Status {
        /// Only show `pending`, `indexed`, `degraded`, or `failed`.
        #[arg(long)]
        status: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::default_filter(cli.verbose));

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            doc_id,
            name,
            pages,
        } => run_ingest(&cfg, &path, doc_id, name, pages).await?,
        Commands::Delete { doc_id } => {
            let services = Services::open(&cfg).await?;
            if services.ingestor.delete_document(doc_id).await? {
                println!("Deleted document {}.", doc_id);
            } else {
                println!("No document with id {}; removed any stray points.", doc_id);
            }
        }
        Commands::Search { query, top_k } => run_search(&cfg, &query, top_k).await?,
        Commands::Context { query, owner, json } => {
            let services = Services::open(&cfg).await?;
            let ctx = services.assembler.assemble(&owner, &query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&ctx)?);
            } else {
                if ctx.text.is_empty() {
                    println!("(no context)");
                } else {
                    println!("{}", ctx.text);
                }
                if !ctx.degraded_sources.is_empty() {
                    eprintln!("degraded: {}", ctx.degraded_sources.join(", "));
                }
            }
        }
        Commands::Remember {
            query,
            owner,
            summary,
            kind,
        } => {
            let append = ConversationAppend {
                owner_id: owner,
                query,
                response_summary: summary,
                kind,
                timestamp: None,
            };
            append.validate()?;
            let services = Services::open(&cfg).await?;
            services.history.append(&append.into_record()).await?;
            println!("Recorded.");
        }
        Commands::SetContext {
            content,
            owner,
            file,
            kind,
        } => {
            let content = match (content, file) {
                (Some(c), _) => c,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("Provide the context text or --file"),
            };
            let kind: ContextKind = kind.parse()?;
            let services = Services::open(&cfg).await?;
            services
                .legacy_context
                .save(&owner, kind, &content)
                .await?;
            println!("Saved context for {}.", owner);
        }
        Commands::Status { status } => run_status(&cfg, status.as_deref()).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    path: &Path,
    doc_id: u64,
    name: Option<String>,
    pages: u32,
) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = match name {
        Some(n) => n,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document {}", doc_id)),
    };

    let request = IngestRequest {
        doc_id,
        name,
        text,
        page_count: pages,
    };
    request.validate()?;

    let services = Services::open(cfg).await?;
    let report = services
        .ingestor
        .ingest_document(&request.into_document())
        .await?;

    println!(
        "Document {}: {} segments, {} upserted, status {}",
        report.doc_id, report.segments, report.upserted, report.status
    );
    if report.fallback_segments > 0 {
        println!(
            "  {} segment(s) embedded with the deterministic fallback",
            report.fallback_segments
        );
    }
    if let Some(err) = &report.error {
        println!("  index error: {}", err);
    }
    Ok(())
}

async fn run_search(cfg: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let services = Services::open(cfg).await?;
    let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
    let results = services.retriever.search(query, top_k).await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        let name = services
            .cache
            .resolve(&services.pool, r.doc_id)
            .await?
            .map(|m| m.name)
            .unwrap_or_else(|| format!("document {}", r.doc_id));
        let preview: String = r.text.chars().take(160).collect();
        println!(
            "{}. [{:.3}] {} #{} ({})",
            i + 1,
            r.score,
            name,
            r.segment_index,
            r.provider
        );
        println!("   {}", preview.replace('\n', " "));
    }
    Ok(())
}

async fn run_status(cfg: &Config, status: Option<&str>) -> Result<()> {
    let filter = status.map(str::parse::<IndexStatus>).transpose()?;
    let services = Services::open(cfg).await?;
    let docs = documents::list_documents(&services.pool, filter).await?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!("{:>8}  {:<10}  {:>5}  NAME", "DOC_ID", "STATUS", "PAGES");
    for d in &docs {
        println!(
            "{:>8}  {:<10}  {:>5}  {}",
            d.doc_id, d.index_status, d.page_count, d.name
        );
    }
    Ok(())
}
