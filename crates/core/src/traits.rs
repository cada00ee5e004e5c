use crate::{EmbeddingRecord, FileHash, IngestError, SearchHit, StoreStats};
use async_trait::async_trait;

/// Persistence for embedding records keyed by `(file_hash, chunk_index)`.
///
/// `upsert` must overwrite records with an existing key so that repeated or
/// concurrent ingestion of the same content converges to one record set.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    async fn contains_hash(&self, file_hash: &FileHash) -> Result<bool, IngestError>;

    /// Hash most recently stored for `source_path`, if any.
    async fn hash_for_source(&self, source_path: &str) -> Result<Option<FileHash>, IngestError>;

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<usize, IngestError>;

    /// Removes every record under `file_hash`. Fails with `NotFound` when
    /// nothing is stored under it.
    async fn delete_by_hash(&self, file_hash: &FileHash) -> Result<usize, IngestError>;

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IngestError>;

    async fn stats(&self) -> Result<StoreStats, IngestError>;
}
