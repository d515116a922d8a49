//! # RAG Gateway CLI (`rgw`)
//!
//! The `rgw` binary drives the document pipeline, retrieval, and insight
//! synthesis against a local SQLite database and file storage root.
//!
//! ## Usage
//!
//! ```bash
//! rgw --config ./config/rgw.toml [--tenant <id>] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgw init` | Create the database, run migrations, create the storage root |
//! | `rgw upload <file>` | Store a file and register a `PENDING` document |
//! | `rgw process <id>` | Extract, chunk, embed, and index a document |
//! | `rgw documents list\|show\|delete` | Inspect or remove documents |
//! | `rgw search "<query>"` | Print the most similar chunks |
//! | `rgw ask "<question>"` | Answer from indexed documents |
//! | `rgw models set\|show` | Manage the tenant's insight model |
//! | `rgw insights generate\|list` | Synthesize or list insights |
//! | `rgw health` | Report provider breaker state |
//!
//! Commands that call the provider read the API key from the variable
//! named by `provider.api_key_env` (default `OPENROUTER_API_KEY`). A
//! `.env` file in the working directory is loaded first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use rag_gateway::config::{self, Config};
use rag_gateway::embedding::EmbeddingIndexer;
use rag_gateway::gateway::Gateway;
use rag_gateway::insight::InsightSynthesizer;
use rag_gateway::lifecycle::{DocumentLibrary, DocumentProcessor};
use rag_gateway::models::ModelConfig;
use rag_gateway::provider::HttpTransport;
use rag_gateway::retrieval::RagAssistant;
use rag_gateway::sqlite_store::SqliteStore;
use rag_gateway::storage::FileStorage;
use rag_gateway::store::Store;
use rag_gateway::{db, migrate};

/// RAG Gateway CLI: resilient LLM access and document retrieval for
/// multi-tenant RAG.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db]` is required; every other section has defaults.
#[derive(Parser)]
#[command(
    name = "rgw",
    about = "RAG Gateway: resilient LLM gateway and document retrieval pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rgw.toml")]
    config: PathBuf,

    /// Tenant the command acts on.
    #[arg(long, global = true, default_value_t = 1)]
    tenant: i64,

    /// Log at debug level unless `RUST_LOG` is set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage root.
    ///
    /// Idempotent: running it again leaves existing data untouched.
    Init,

    /// Upload a file as a new `PENDING` document.
    ///
    /// Supported types: .txt, .md, .pdf, .docx.
    Upload {
        /// Path of the file to upload.
        path: PathBuf,

        /// Document title. Defaults to the file name without extension.
        #[arg(long)]
        title: Option<String>,

        /// Owning user ID.
        #[arg(long, default_value_t = 1)]
        owner: i64,

        /// Process the document right after uploading it.
        #[arg(long)]
        process: bool,
    },

    /// Extract, chunk, embed, and index a document.
    Process {
        /// Document UUID.
        id: String,
    },

    /// Inspect and manage documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Print the chunks most similar to a query.
    Search {
        query: String,

        /// Maximum number of results. Defaults to `retrieval.limit`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from the tenant's indexed documents.
    Ask { question: String },

    /// Manage the tenant's insight model configuration.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Generate or list conversation insights.
    Insights {
        #[command(subcommand)]
        action: InsightsAction,
    },

    /// Report provider circuit breaker state as JSON.
    Health,
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List the tenant's documents, newest first.
    List,
    /// Show one document and its chunks.
    Show { id: String },
    /// Delete a document, its chunks, and its stored file.
    Delete { id: String },
}

#[derive(Subcommand)]
enum ModelsAction {
    /// Set the chat model used for insight synthesis.
    Set {
        model: String,

        /// Store the configuration as inactive.
        #[arg(long)]
        inactive: bool,
    },
    /// Show the active model configuration.
    Show,
}

#[derive(Subcommand)]
enum InsightsAction {
    /// Synthesize insights from recent conversations.
    Generate,
    /// List stored insights, newest first.
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "rag_gateway=debug,rgw=debug"
    } else {
        "rag_gateway=info,rgw=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Shared handles opened once per invocation.
struct App {
    cfg: Config,
    store: Arc<dyn Store>,
    files: FileStorage,
}

impl App {
    async fn open(cfg: Config) -> Result<Self> {
        let pool = db::connect(&cfg).await?;
        Ok(Self {
            files: FileStorage::new(cfg.storage.root.clone()),
            store: Arc::new(SqliteStore::new(pool)),
            cfg,
        })
    }

    fn gateway(&self) -> Result<Arc<Gateway>> {
        let transport = HttpTransport::from_config(&self.cfg.provider)
            .context("Failed to configure provider transport")?;
        Ok(Arc::new(Gateway::from_config(Arc::new(transport), &self.cfg)))
    }

    fn library(&self) -> DocumentLibrary {
        DocumentLibrary::new(self.store.clone(), self.files.clone())
    }

    fn processor(&self) -> Result<DocumentProcessor> {
        let indexer = EmbeddingIndexer::new(
            self.gateway()?,
            self.cfg.models.primary_embedding(),
            self.cfg.embedding.dims,
        );
        Ok(DocumentProcessor::new(
            self.store.clone(),
            self.files.clone(),
            indexer,
            self.cfg.chunking.clone(),
        ))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let tenant = cli.tenant;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            tokio::fs::create_dir_all(&cfg.storage.root)
                .await
                .with_context(|| {
                    format!(
                        "Failed to create storage root: {}",
                        cfg.storage.root.display()
                    )
                })?;
            println!("Database initialized successfully.");
        }
        Commands::Upload {
            path,
            title,
            owner,
            process,
        } => {
            let app = App::open(cfg).await?;
            let doc = app.library().upload(tenant, owner, &path, title).await?;
            println!("{}\t{}\t{}", doc.id, doc.status, doc.title);
            if process {
                let ready = app.processor()?.process(&doc.id).await?;
                println!("{}\t{}\tchunks={}", ready.id, ready.status, ready.chunk_count);
            }
        }
        Commands::Process { id } => {
            let app = App::open(cfg).await?;
            if app.library().get(tenant, &id).await?.is_none() {
                bail!("document not found: {}", id);
            }
            let ready = app.processor()?.process(&id).await?;
            println!("{}\t{}\tchunks={}", ready.id, ready.status, ready.chunk_count);
        }
        Commands::Documents { action } => {
            let app = App::open(cfg).await?;
            let library = app.library();
            match action {
                DocumentsAction::List => {
                    let docs = library.list(tenant).await?;
                    if docs.is_empty() {
                        println!("No documents.");
                    }
                    for doc in docs {
                        println!(
                            "{}\t{}\tchunks={}\t{}",
                            doc.id, doc.status, doc.chunk_count, doc.title
                        );
                    }
                }
                DocumentsAction::Show { id } => {
                    let doc = library
                        .get(tenant, &id)
                        .await?
                        .with_context(|| format!("document not found: {}", id))?;
                    print_json(&doc)?;
                    for chunk in app.store.list_chunks(&doc.id).await? {
                        println!(
                            "--- chunk {} ({} tokens, embedded: {})",
                            chunk.chunk_index,
                            chunk.token_count,
                            chunk.embedding.is_some()
                        );
                        println!("{}", chunk.content);
                    }
                }
                DocumentsAction::Delete { id } => {
                    if library.delete(tenant, &id).await? {
                        println!("Deleted {}.", id);
                    } else {
                        bail!("document not found: {}", id);
                    }
                }
            }
        }
        Commands::Search { query, limit } => {
            let app = App::open(cfg).await?;
            let assistant = RagAssistant::new(app.gateway()?, app.store.clone(), &app.cfg);
            let hits = assistant.search(tenant, &query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    i + 1,
                    hit.similarity,
                    hit.document_title,
                    hit.chunk.chunk_index
                );
                println!("   {}", hit.chunk.content.replace('\n', " "));
            }
        }
        Commands::Ask { question } => {
            let app = App::open(cfg).await?;
            let assistant = RagAssistant::new(app.gateway()?, app.store.clone(), &app.cfg);
            let answer = assistant.ask(tenant, &question).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                for (i, source) in answer.sources.iter().enumerate() {
                    println!("[{}] {} ({:.2})", i + 1, source.document_title, source.similarity);
                }
            }
        }
        Commands::Models { action } => {
            let app = App::open(cfg).await?;
            match action {
                ModelsAction::Set { model, inactive } => {
                    if model.trim().is_empty() {
                        bail!("model must not be empty");
                    }
                    let config = ModelConfig {
                        id: uuid::Uuid::new_v4().to_string(),
                        tenant_id: tenant,
                        chat_model: model,
                        is_active: !inactive,
                        updated_at: chrono::Utc::now().timestamp(),
                    };
                    app.store.upsert_model_config(&config).await?;
                    println!("Model set to {} (active: {}).", config.chat_model, config.is_active);
                }
                ModelsAction::Show => match app.store.active_model_config(tenant).await? {
                    Some(config) => print_json(&config)?,
                    None => println!("No active model configuration."),
                },
            }
        }
        Commands::Insights { action } => {
            let app = App::open(cfg).await?;
            match action {
                InsightsAction::Generate => {
                    let synthesizer = InsightSynthesizer::new(
                        app.gateway()?,
                        app.store.clone(),
                        app.cfg.insights.clone(),
                    );
                    let outcome = synthesizer.generate(tenant).await?;
                    print_json(&outcome)?;
                }
                InsightsAction::List { limit } => {
                    let insights = app.store.list_insights(tenant, limit).await?;
                    print_json(&insights)?;
                }
            }
        }
        Commands::Health => {
            let transport = HttpTransport::new(cfg.provider.base_url.clone(), None)?;
            let gateway = Gateway::from_config(Arc::new(transport), &cfg);
            print_json(&gateway.health())?;
        }
    }

    Ok(())
}
