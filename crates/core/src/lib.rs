pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod stores;
pub mod traits;

pub use chunking::{chunk, normalize_whitespace, stitch, Chunker, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiConfig, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ErrorKind, IngestError, Result};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use identity::{digest_file, identify, should_reprocess, DedupTracker, Freshness};
pub use ingest::discover_pdf_files;
pub use models::{
    Chunk, EmbeddingRecord, ExtractedText, ExtractionMetadata, FileHash, IngestionOptions,
    IngestionResult, Outcome, PipelineStats, RecordKey, SearchHit, SourceDocument, Stage,
    StalePolicy, StoreStats,
};
pub use orchestrator::{DocumentState, Pipeline, TransitionError};
pub use stores::{InMemoryVectorStore, QdrantConfig, QdrantStore};
pub use traits::VectorStore;
