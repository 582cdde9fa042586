//! # Course Tutor CLI (`tutor`)
//!
//! Drives the tutor core from the command line: database initialization,
//! document ingestion and deletion, listing, asking questions, and starting
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the SQLite database and run schema migrations |
//! | `tutor ingest <file>` | Extract, chunk, embed and store one file |
//! | `tutor delete <name>` | Delete a document and its blob |
//! | `tutor count` | Count documents in a course |
//! | `tutor list` | List documents in a course |
//! | `tutor ask "<question>"` | Answer a question from course materials |
//! | `tutor serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use anyhow::Context;
use course_tutor::config;
use course_tutor::migrate;
use course_tutor::models::{Scope, SourceType};
use course_tutor::server;
use course_tutor::service::{local_blob_store, TutorService};

/// Course Tutor: retrieval-augmented tutoring over uploaded course materials.
#[derive(Parser)]
#[command(
    name = "tutor",
    about = "Course Tutor: ingest course materials and answer questions grounded in them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Owner and course every document operation is scoped to.
#[derive(clap::Args)]
struct ScopeArgs {
    /// Owner identifier.
    #[arg(long)]
    owner: String,

    /// Course identifier.
    #[arg(long)]
    course: String,
}

impl ScopeArgs {
    fn scope(&self) -> Scope {
        Scope::new(&self.owner, &self.course)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Fails if the database was created for a different
    /// embedding dimension than `[embedding] dims`.
    Init,

    /// Ingest one file into a course.
    Ingest {
        /// File to ingest.
        file: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Display name (defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        /// Source type: pdf, docx, doc or txt (defaults to the extension).
        #[arg(long = "type")]
        source_type: Option<String>,
    },

    /// Delete a document. Deleting a missing document is not an error.
    Delete {
        /// Display name of the document.
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Count documents in a course.
    Count {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List documents in a course.
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Ask the tutor a question.
    Ask {
        question: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

async fn open_service(cfg: &config::Config) -> anyhow::Result<TutorService> {
    let blobs = Arc::new(local_blob_store(cfg)?);
    TutorService::open(cfg, blobs).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            scope,
            name,
            source_type,
        } => {
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let name = name.unwrap_or_else(|| file_name.clone());
            let source_type = match source_type {
                Some(t) => t,
                None => SourceType::from_file_name(&file_name)?.to_string(),
            };
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let service = open_service(&cfg).await?;
            let outcome = service
                .ingest_document(&scope.scope(), &name, &source_type, bytes)
                .await?;
            println!("document: {}", name);
            println!("chunks: {}", outcome.chunks_stored);
            if let Some(locator) = outcome.blob_locator {
                println!("blob: {}", locator);
            }
            println!("ok");
        }
        Commands::Delete { name, scope } => {
            let service = open_service(&cfg).await?;
            let outcome = service.delete_document(&scope.scope(), &name).await?;
            println!("document: {}", name);
            println!("chunks_removed: {}", outcome.chunks_removed);
            if let Some(warning) = outcome.blob_warning {
                println!("warning: {}", warning);
            }
            println!("ok");
        }
        Commands::Count { scope } => {
            let service = open_service(&cfg).await?;
            let count = service.count_documents(&scope.scope()).await?;
            println!("documents: {}", count);
        }
        Commands::List { scope } => {
            let service = open_service(&cfg).await?;
            let documents = service.list_documents(&scope.scope()).await?;
            if documents.is_empty() {
                println!("No documents.");
            }
            for doc in documents {
                println!(
                    "{}  type={}  chunks={}  created_at={}",
                    doc.name, doc.source_type, doc.chunk_count, doc.created_at
                );
            }
        }
        Commands::Ask { question, scope } => {
            let service = open_service(&cfg).await?;
            let result = service.answer(&scope.scope(), &question, &[]).await?;
            println!("{}", result.answer);
            println!();
            println!("sources: {}", result.sources.join(", "));
            println!("confidence: {:.2}", result.confidence);
            println!("context_used: {}", result.context_used);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
