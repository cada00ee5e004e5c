use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_ingest_core::{
    CharacterNgramEmbedder, Embedder, FileHash, InMemoryVectorStore, IngestionOptions,
    IngestionResult, LopdfExtractor, OpenAiConfig, OpenAiEmbedder, Outcome, Pipeline,
    QdrantConfig, QdrantStore, StalePolicy, VectorStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "pdf-ingest", version, about = "Ingest PDFs into a vector store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Embedding backend.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Vector store backend. `memory` keeps nothing after the process exits.
    #[arg(long, value_enum, default_value_t = StoreKind::Qdrant)]
    store: StoreKind,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1/")]
    openai_base_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = 1536)]
    embedding_dimensions: usize,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    #[arg(long, env = "QDRANT_COLLECTION", default_value = "pdf_chunks")]
    qdrant_collection: String,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Chunk length in characters.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Chunks per embedding request.
    #[arg(long, env = "EMBEDDING_BATCH_SIZE", default_value_t = 100)]
    embedding_batch_size: usize,

    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 50)]
    max_file_size_mb: u64,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 60)]
    http_timeout_secs: u64,

    /// What happens to a changed file's previous records.
    #[arg(long, default_value = "replace")]
    stale_policy: StalePolicy,

    /// Documents processed at once by directory runs.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Print machine-readable JSON instead of a summary.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single PDF.
    ProcessFile { path: PathBuf },
    /// Ingest every PDF in a directory.
    ProcessDirectory {
        dir: PathBuf,
        /// Descend into subdirectories.
        #[arg(long, default_value_t = false)]
        recursive: bool,
    },
    /// Nearest chunks for a query.
    Search {
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Vector count and pipeline settings.
    Stats,
    /// Remove every record of a document by its file hash.
    Delete { file_hash: FileHash },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    Openai,
    Ngram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Qdrant,
    Memory,
}

impl Cli {
    fn options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embedding_batch_size: self.embedding_batch_size,
            max_file_size_bytes: self.max_file_size_mb.saturating_mul(1024 * 1024),
            stale_policy: self.stale_policy,
            concurrency: self.concurrency,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn openai_embedder(&self) -> anyhow::Result<OpenAiEmbedder> {
        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required with --embedder openai")?;
        let mut config = OpenAiConfig::new(
            api_key,
            self.embedding_model.clone(),
            self.embedding_dimensions,
        )?;
        config.base_url = Url::parse(&self.openai_base_url)
            .with_context(|| format!("invalid OPENAI_BASE_URL {:?}", self.openai_base_url))?;
        config.timeout = self.timeout();
        Ok(OpenAiEmbedder::new(config)?)
    }

    fn qdrant_store(&self, vector_size: usize) -> anyhow::Result<QdrantStore> {
        Url::parse(&self.qdrant_url)
            .with_context(|| format!("invalid QDRANT_URL {:?}", self.qdrant_url))?;
        Ok(QdrantStore::new(QdrantConfig {
            endpoint: self.qdrant_url.clone(),
            collection: self.qdrant_collection.clone(),
            vector_size,
            api_key: self.qdrant_api_key.clone(),
            timeout: self.timeout(),
        })?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        embedder = ?cli.embedder,
        store = ?cli.store,
        "pdf-ingest boot"
    );

    match cli.embedder {
        EmbedderKind::Openai => {
            let embedder = cli.openai_embedder()?;
            with_store(&cli, embedder).await
        }
        EmbedderKind::Ngram => {
            let embedder = CharacterNgramEmbedder {
                dimensions: cli.embedding_dimensions,
            };
            with_store(&cli, embedder).await
        }
    }
}

async fn with_store<M: Embedder>(cli: &Cli, embedder: M) -> anyhow::Result<ExitCode> {
    let options = cli.options();
    match cli.store {
        StoreKind::Qdrant => {
            let store = cli.qdrant_store(embedder.dimensions())?;
            store
                .ensure_collection()
                .await
                .context("qdrant collection check failed")?;
            execute(cli, Pipeline::new(options, LopdfExtractor, embedder, store)?).await
        }
        StoreKind::Memory => {
            warn!("in-memory store selected; records are dropped on exit");
            let store = InMemoryVectorStore::new();
            execute(cli, Pipeline::new(options, LopdfExtractor, embedder, store)?).await
        }
    }
}

async fn execute<M, S>(
    cli: &Cli,
    pipeline: Pipeline<LopdfExtractor, M, S>,
) -> anyhow::Result<ExitCode>
where
    M: Embedder,
    S: VectorStore,
{
    match &cli.command {
        Command::ProcessFile { path } => {
            let result = pipeline.process(path).await;
            report(cli.json, std::slice::from_ref(&result))
        }
        Command::ProcessDirectory { dir, recursive } => {
            let results = pipeline.process_directory(dir, *recursive).await?;
            report(cli.json, &results)
        }
        Command::Search { query, top_k } => {
            let hits = pipeline.search(query, *top_k).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                println!("query: {query}");
                for hit in hits {
                    println!(
                        "score={:.4} file_hash={} chunk={} source={}",
                        hit.score,
                        hit.key.file_hash.short(),
                        hit.key.chunk_index,
                        hit.source_path
                    );
                    println!("  {}", hit.text);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            let stats = pipeline.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("backend: {}", pipeline.store().name());
                println!("total_vectors: {}", stats.store.total_vectors);
                if let Some(dimensions) = stats.store.dimensions {
                    println!("collection_dimensions: {dimensions}");
                }
                println!(
                    "embedding: {} ({} dims)",
                    stats.embedding_model, stats.embedding_dimensions
                );
                println!(
                    "chunking: size={} overlap={}",
                    stats.chunk_size, stats.chunk_overlap
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { file_hash } => {
            let deleted = pipeline.delete_document(file_hash).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "file_hash": file_hash, "deleted": deleted })
                );
            } else {
                println!("deleted {deleted} records for {file_hash}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Prints per-file outcomes; fails the process when any file failed.
fn report(json: bool, results: &[IngestionResult]) -> anyhow::Result<ExitCode> {
    let failed = results.iter().filter(|result| result.is_failure()).count();

    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
    } else {
        for result in results {
            let hash = result
                .document_id
                .as_ref()
                .map(FileHash::short)
                .unwrap_or("-");
            match &result.outcome {
                Outcome::Stored => println!(
                    "stored   {} chunks={} hash={hash} {}ms",
                    result.source_path.display(),
                    result.chunk_count,
                    result.elapsed_ms
                ),
                Outcome::Skipped => println!(
                    "skipped  {} hash={hash} (unchanged)",
                    result.source_path.display()
                ),
                Outcome::Failed { stage, cause, .. } => println!(
                    "failed   {} stage={stage} error={cause}",
                    result.source_path.display()
                ),
            }
        }
        let stored = results
            .iter()
            .filter(|result| result.outcome == Outcome::Stored)
            .count();
        println!(
            "{} files: {stored} stored, {} skipped, {failed} failed",
            results.len(),
            results.len() - stored - failed
        );
    }

    Ok(if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
