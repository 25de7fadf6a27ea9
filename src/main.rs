//! paperbase CLI entry point

use clap::{Parser, Subcommand};
use paperbase::{
    answer::{GroundedAnswerAssembler, HttpGenerator},
    config::{Config, PathsConfig},
    embed::{create_embedder, Embedder},
    error::{Error, Result},
    index::{QdrantIndex, ScopeFilter, VectorIndex},
    ingest::{IngestionOrchestrator, UploadOutcome},
    jobs::{worker::WorkerPool, JobQueue},
    meta::{JobStatus, MetaDb},
    retrieve::{RetrievalPlanner, Selection},
    storage::BlobStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "paperbase")]
#[command(version, about = "Document ingestion and grounded question answering", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize paperbase configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Upload a PDF into a workspace
    Upload {
        /// Path to the PDF file
        path: PathBuf,

        /// Workspace to upload into
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },

    /// Run the ingestion worker pool until interrupted
    Worker,

    /// Ask a question against a workspace's documents
    Ask {
        /// The question
        question: String,

        /// Workspace to search
        #[arg(short, long, default_value = "default")]
        workspace: String,

        /// Restrict search to one document
        #[arg(long)]
        doc: Option<String>,

        /// Chat session id (answers are persisted per session)
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Selected text to ground the answer in instead of searching
        #[arg(long)]
        selection: Option<String>,

        /// Document the selection came from
        #[arg(long, requires = "selection")]
        selection_doc: Option<String>,

        /// Page the selection came from
        #[arg(long, requires = "selection")]
        selection_page: Option<i64>,
    },

    /// Rebuild the vector index from the relational store
    Rebuild {
        /// Workspace to rebuild
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },

    /// List documents in a workspace
    Docs {
        /// Workspace to list
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Init doesn't need an existing config
    if let Commands::Init { force } = cli.command {
        return handle_init(cli.config, force).await;
    }

    let config = Config::load_or_default(cli.config.clone())?;
    config.validate()?;

    let db = MetaDb::new(&config.paths.db_file).await?;
    let store = BlobStore::new(config.paths.blob_dir.clone())?;
    let queue = JobQueue::new(
        db.clone(),
        config.jobs.lease_secs,
        config.jobs.max_attempts as i64,
    );

    let index = QdrantIndex::new(
        &config.qdrant_url,
        &config.collection_name,
        config.embedding.dimension,
    )
    .await?;
    index.ensure_collection().await?;
    let index: Arc<dyn VectorIndex> = Arc::new(index);

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Upload { path, workspace } => {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Config(format!("invalid file path: {:?}", path)))?
                .to_string();
            let file = std::fs::File::open(&path)?;

            let orchestrator = IngestionOrchestrator::new(
                db, store, queue, embedder, index, config,
            );
            let outcome = orchestrator.upload(&workspace, &filename, file).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(outcome.document())?);
            } else {
                match &outcome {
                    UploadOutcome::Created { document, job_id } => {
                        println!("Uploaded {} as document {}", filename, document.id);
                        println!("Queued ingestion job {}", job_id);
                    }
                    UploadOutcome::Duplicate { document } => {
                        println!(
                            "Identical content already exists as document {} ({})",
                            document.id, document.status
                        );
                    }
                }
            }
        }

        Commands::Worker => {
            let workers = config.jobs.workers;
            let poll = Duration::from_millis(config.jobs.poll_interval_ms);
            let orchestrator = Arc::new(IngestionOrchestrator::new(
                db,
                store,
                queue.clone(),
                embedder,
                index,
                config,
            ));

            let pool = WorkerPool::spawn(queue, orchestrator, workers, poll);
            info!("Workers running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| Error::Other(format!("failed to listen for Ctrl-C: {}", e)))?;
            pool.shutdown().await;
        }

        Commands::Ask {
            question,
            workspace,
            doc,
            session,
            selection,
            selection_doc,
            selection_page,
        } => {
            let scope = match doc {
                Some(doc_id) => ScopeFilter::document(workspace.as_str(), doc_id),
                None => ScopeFilter::workspace(workspace.as_str()),
            };
            let selection = selection.map(|text| Selection {
                text,
                doc_id: selection_doc,
                page: selection_page,
            });

            let planner = RetrievalPlanner::new(
                db.clone(),
                embedder,
                index,
                config.retrieval.clone(),
            );
            let context = planner.plan(&question, selection.as_ref(), &scope).await?;

            let generator = Arc::new(HttpGenerator::new(&config.answer)?);
            let assembler = GroundedAnswerAssembler::new(db, generator);
            let answer = assembler
                .assemble(&workspace, &session, &question, &context)
                .await?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "content": answer.content,
                        "citations": answer.citations,
                    }))?
                );
            } else {
                println!("{}", answer.content);
                if !answer.citations.is_empty() {
                    println!();
                    for (i, citation) in answer.citations.iter().enumerate() {
                        println!(
                            "[{}] doc {} page {}",
                            i + 1,
                            citation.doc_id.as_deref().unwrap_or("-"),
                            citation
                                .page
                                .map(|p| p.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                        );
                    }
                }
            }
        }

        Commands::Rebuild { workspace } => {
            let orchestrator = IngestionOrchestrator::new(
                db, store, queue, embedder, index, config,
            );
            orchestrator.rebuild_index(&workspace, None).await?;
            println!("Rebuilt index for workspace {}", workspace);
        }

        Commands::Docs { workspace } => {
            let docs = db.list_documents(&workspace).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents in workspace {}", workspace);
            } else {
                for doc in docs {
                    println!(
                        "{}  {:<10}  {:>4} pages  {}",
                        doc.id,
                        doc.status,
                        doc.num_pages.unwrap_or(0),
                        doc.filename,
                    );
                }
            }
        }

        Commands::Status => {
            let pending = queue.count_by_status(JobStatus::Pending).await?;
            let in_progress = queue.count_by_status(JobStatus::InProgress).await?;
            let completed = queue.count_by_status(JobStatus::Completed).await?;
            let failed = queue.count_by_status(JobStatus::Failed).await?;
            let points = index.count().await?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "jobs": {
                            "pending": pending,
                            "in_progress": in_progress,
                            "completed": completed,
                            "failed": failed,
                        },
                        "index_points": points,
                        "embedding_model": config.embedding.model,
                    }))?
                );
            } else {
                println!("Jobs:  {} pending, {} in progress, {} completed, {} failed",
                    pending, in_progress, completed, failed);
                println!("Index: {} points ({})", points, config.embedding.model);
                println!("Data:  {}", config.paths.base_dir.display());
            }
        }
    }

    Ok(())
}

async fn handle_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let base_dir = config_path
        .as_deref()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(paperbase::config::default_base_dir);

    let mut config = Config::default();
    config.paths = PathsConfig::from_base(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::AlreadyInitialized);
    }

    config.save()?;
    MetaDb::new(&config.paths.db_file).await?;
    BlobStore::new(config.paths.blob_dir.clone())?;

    println!("Initialized paperbase in {}", config.paths.base_dir.display());
    println!("Config: {}", config.paths.config_file.display());
    Ok(())
}
