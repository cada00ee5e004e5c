use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::extractor::PdfExtractor;
use crate::identity::{identify, DedupTracker, Freshness};
use crate::ingest::discover_pdf_files;
use crate::traits::VectorStore;
use crate::{
    Chunk, EmbeddingRecord, ExtractedText, FileHash, IngestError, IngestionOptions,
    IngestionResult, Outcome, PipelineStats, RecordKey, SearchHit, SourceDocument, Stage,
    StalePolicy,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle of one document inside [`Pipeline::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Parsed,
    Chunked,
    Embedded,
    Stored,
    Skipped,
    Failed(Stage),
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal document transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: DocumentState,
    pub to: DocumentState,
}

impl DocumentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stored | Self::Skipped | Self::Failed(_))
    }

    pub fn advance(self, to: DocumentState) -> Result<DocumentState, TransitionError> {
        use DocumentState::*;

        let allowed = match (self, to) {
            (Pending, Parsed)
            | (Parsed, Chunked)
            | (Chunked, Embedded)
            | (Embedded, Stored)
            | (Pending, Skipped) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        };

        if allowed {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: IngestError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T, E: Into<IngestError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure {
            stage,
            error: error.into(),
        })
    }
}

struct Run {
    state: DocumentState,
    document_id: Option<FileHash>,
    chunk_count: usize,
    replaced: Option<FileHash>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: DocumentState::Pending,
            document_id: None,
            chunk_count: 0,
            replaced: None,
        }
    }

    fn enter(&mut self, next: DocumentState, stage: Stage) -> Result<(), StageFailure> {
        self.state = self.state.advance(next).at(stage)?;
        Ok(())
    }
}

/// Sequences read → identify → extract → chunk → embed → store for each file.
pub struct Pipeline<E, M, S>
where
    E: PdfExtractor,
    M: Embedder,
    S: VectorStore,
{
    options: IngestionOptions,
    chunker: Chunker,
    extractor: Arc<E>,
    embedder: M,
    store: S,
}

impl<E, M, S> Pipeline<E, M, S>
where
    E: PdfExtractor + 'static,
    M: Embedder,
    S: VectorStore,
{
    pub fn new(
        options: IngestionOptions,
        extractor: E,
        embedder: M,
        store: S,
    ) -> Result<Self, IngestError> {
        let chunking = options.validate()?;
        Ok(Self {
            options,
            chunker: Chunker::new(chunking),
            extractor: Arc::new(extractor),
            embedder,
            store,
        })
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn process(&self, path: &Path) -> IngestionResult {
        let started = Instant::now();
        let mut run = Run::new();
        let result = self.run_stages(path, &mut run).await;

        let outcome = match result {
            Ok(()) if run.state == DocumentState::Skipped => {
                info!(
                    path = %path.display(),
                    replaced = run.replaced.as_ref().map(FileHash::short),
                    "content already stored, skipped"
                );
                Outcome::Skipped
            }
            Ok(()) => {
                info!(
                    path = %path.display(),
                    chunk_count = run.chunk_count,
                    replaced = run.replaced.as_ref().map(FileHash::short),
                    "document stored"
                );
                Outcome::Stored
            }
            Err(failure) => {
                let state = run
                    .state
                    .advance(DocumentState::Failed(failure.stage))
                    .unwrap_or(run.state);
                warn!(
                    path = %path.display(),
                    ?state,
                    stage = %failure.stage,
                    error = %failure.error,
                    "document failed"
                );
                Outcome::Failed {
                    stage: failure.stage,
                    kind: failure.error.kind(),
                    cause: failure.error.to_string(),
                }
            }
        };

        IngestionResult {
            source_path: path.to_path_buf(),
            document_id: run.document_id,
            chunk_count: run.chunk_count,
            outcome,
            replaced: run.replaced,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// One result per input, in input order.
    pub async fn process_batch(&self, paths: &[PathBuf]) -> Vec<IngestionResult> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            results.push(self.process(path).await);
        }
        results
    }

    /// Like [`Pipeline::process_batch`] with up to `concurrency` documents in flight.
    pub async fn process_batch_concurrent(
        &self,
        paths: &[PathBuf],
        concurrency: usize,
    ) -> Vec<IngestionResult> {
        stream::iter(paths)
            .map(|path| self.process(path))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    pub async fn process_directory(
        &self,
        folder: &Path,
        recursive: bool,
    ) -> Result<Vec<IngestionResult>, IngestError> {
        if !folder.is_dir() {
            return Err(IngestError::Configuration(format!(
                "directory not found: {}",
                folder.display()
            )));
        }

        let files = discover_pdf_files(folder, recursive);
        if files.is_empty() {
            warn!(folder = %folder.display(), recursive, "no pdf files found");
            return Ok(Vec::new());
        }

        info!(folder = %folder.display(), files = files.len(), "processing directory");
        Ok(if self.options.concurrency > 1 {
            self.process_batch_concurrent(&files, self.options.concurrency)
                .await
        } else {
            self.process_batch(&files).await
        })
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, IngestError> {
        if query.trim().is_empty() {
            return Err(IngestError::Configuration("query is empty".to_string()));
        }

        let vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| {
                IngestError::dependency(self.embedder.model_name(), "empty embedding response")
            })?;

        self.store.search(&query_vector, top_k).await
    }

    pub async fn delete_document(&self, file_hash: &FileHash) -> Result<usize, IngestError> {
        let deleted = self.store.delete_by_hash(file_hash).await?;
        info!(file_hash = %file_hash.short(), deleted, "deleted document records");
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<PipelineStats, IngestError> {
        Ok(PipelineStats {
            store: self.store.stats().await?,
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dimensions: self.embedder.dimensions(),
            chunk_size: self.chunker.config().chunk_size(),
            chunk_overlap: self.chunker.config().overlap(),
        })
    }

    async fn run_stages(&self, path: &Path, run: &mut Run) -> Result<(), StageFailure> {
        let (source_path, bytes) = self.read_source(path).await.at(Stage::Extract)?;

        let file_hash = identify(&bytes);
        run.document_id = Some(file_hash.clone());
        let freshness = DedupTracker::new(&self.store)
            .assess(&file_hash, &source_path)
            .await
            .at(Stage::Identify)?;
        if !freshness.should_reprocess() {
            if let Some(previous) = freshness.previous() {
                run.replaced = self.retire_previous(previous).await.at(Stage::Store)?;
            }
            return run.enter(DocumentState::Skipped, Stage::Identify);
        }

        let byte_size = bytes.len() as u64;
        let extracted = self.extract(bytes).await.at(Stage::Extract)?;
        let document = SourceDocument {
            file_hash,
            source_path,
            byte_size,
            text: extracted.text,
            metadata: extracted.metadata,
        };
        run.enter(DocumentState::Parsed, Stage::Extract)?;
        debug!(
            file_hash = %document.file_hash.short(),
            pages = document.metadata.page_count,
            bytes = document.byte_size,
            "extracted text"
        );

        let chunks = self.chunker.chunk(&document.text);
        run.chunk_count = chunks.len();
        run.enter(DocumentState::Chunked, Stage::Chunk)?;

        let vectors = self.embed_chunks(&chunks).await.at(Stage::Embed)?;
        run.enter(DocumentState::Embedded, Stage::Embed)?;

        if !chunks.is_empty() {
            let records = build_records(&document, chunks, vectors);
            if let Err(error) = self.store.upsert(&records).await {
                self.discard_partial(&document.file_hash).await;
                return Err(StageFailure {
                    stage: Stage::Store,
                    error,
                });
            }
        }

        if let Freshness::Modified { previous } = freshness {
            run.replaced = self.retire_previous(&previous).await.at(Stage::Store)?;
        }
        run.enter(DocumentState::Stored, Stage::Store)
    }

    /// Parses on the blocking pool; lopdf is CPU-bound.
    async fn extract(&self, bytes: Vec<u8>) -> Result<ExtractedText, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))?
    }

    /// Removes whatever a failed upsert managed to write, so the hash is not
    /// mistaken for a fully ingested document on the next run.
    async fn discard_partial(&self, file_hash: &FileHash) {
        match self.store.delete_by_hash(file_hash).await {
            Ok(deleted) => {
                debug!(file_hash = %file_hash.short(), deleted, "discarded partial upsert")
            }
            Err(IngestError::NotFound(_)) => {}
            Err(error) => warn!(
                file_hash = %file_hash.short(),
                error = %error,
                "partial upsert could not be discarded"
            ),
        }
    }

    async fn read_source(&self, path: &Path) -> Result<(String, Vec<u8>), IngestError> {
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(IngestError::Extraction(format!(
                "file must be a pdf: {}",
                path.display()
            )));
        }

        let size = tokio::fs::metadata(path).await?.len();
        if size > self.options.max_file_size_bytes {
            return Err(IngestError::Extraction(format!(
                "file size {size} bytes exceeds maximum {} bytes",
                self.options.max_file_size_bytes
            )));
        }

        let canonical = tokio::fs::canonicalize(path).await?;
        let bytes = tokio::fs::read(&canonical).await?;
        Ok((canonical.to_string_lossy().to_string(), bytes))
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, IngestError> {
        let dimensions = self.embedder.dimensions();
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.options.embedding_batch_size) {
            let embedded = self.embedder.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(IngestError::dependency(
                    self.embedder.model_name(),
                    format!("returned {} vectors for {} texts", embedded.len(), batch.len()),
                ));
            }
            if let Some(vector) = embedded.iter().find(|vector| vector.len() != dimensions) {
                return Err(IngestError::dependency(
                    self.embedder.model_name(),
                    format!(
                        "returned a {}-dimensional vector, expected {dimensions}",
                        vector.len()
                    ),
                ));
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    /// Applies the stale policy to the records of a file's previous content.
    async fn retire_previous(
        &self,
        previous: &FileHash,
    ) -> Result<Option<FileHash>, IngestError> {
        if self.options.stale_policy == StalePolicy::Retain {
            debug!(previous = %previous.short(), "retaining records of previous content");
            return Ok(None);
        }

        match self.store.delete_by_hash(previous).await {
            Ok(deleted) => {
                debug!(
                    previous = %previous.short(),
                    deleted,
                    "removed records of previous content"
                );
                Ok(Some(previous.clone()))
            }
            Err(IngestError::NotFound(_)) => Ok(None),
            Err(error) => Err(IngestError::Dependency(format!(
                "new records stored but stale records for {previous} were not removed: {error}"
            ))),
        }
    }
}

fn build_records(
    document: &SourceDocument,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
) -> Vec<EmbeddingRecord> {
    let ingested_at = Utc::now();
    chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| EmbeddingRecord {
            key: RecordKey::new(document.file_hash.clone(), chunk.index),
            chunk,
            vector,
            source_path: document.source_path.clone(),
            title: document.metadata.title.clone(),
            ingested_at,
        })
        .collect()
}
