//! In-process [`VectorStore`] for tests and offline runs.
//!
//! Records live in a `BTreeMap` keyed by [`RecordKey`] behind a `RwLock`, so
//! an upsert of an existing key replaces it. Search is brute-force cosine.

use crate::traits::VectorStore;
use crate::{EmbeddingRecord, FileHash, IngestError, RecordKey, SearchHit, StoreStats};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Records = BTreeMap<RecordKey, EmbeddingRecord>;

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Records>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|records| records.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hashes(&self) -> BTreeSet<FileHash> {
        self.read()
            .map(|records| records.keys().map(|key| key.file_hash.clone()).collect())
            .unwrap_or_default()
    }

    pub fn records_for(&self, file_hash: &FileHash) -> Vec<EmbeddingRecord> {
        self.read()
            .map(|records| {
                records
                    .values()
                    .filter(|record| &record.key.file_hash == file_hash)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, IngestError> {
        self.records
            .read()
            .map_err(|_| IngestError::dependency("memory", "record lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, IngestError> {
        self.records
            .write()
            .map_err(|_| IngestError::dependency("memory", "record lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn contains_hash(&self, file_hash: &FileHash) -> Result<bool, IngestError> {
        Ok(self.read()?.keys().any(|key| &key.file_hash == file_hash))
    }

    async fn hash_for_source(&self, source_path: &str) -> Result<Option<FileHash>, IngestError> {
        Ok(self
            .read()?
            .values()
            .filter(|record| record.source_path == source_path)
            .max_by_key(|record| record.ingested_at)
            .map(|record| record.key.file_hash.clone()))
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<usize, IngestError> {
        let mut stored = self.write()?;
        for record in records {
            stored.insert(record.key.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn delete_by_hash(&self, file_hash: &FileHash) -> Result<usize, IngestError> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|key, _| &key.file_hash != file_hash);
        let deleted = before - stored.len();
        if deleted == 0 {
            return Err(IngestError::NotFound(format!(
                "no records stored for file hash {file_hash}"
            )));
        }
        Ok(deleted)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IngestError> {
        let stored = self.read()?;
        let mut hits: Vec<SearchHit> = stored
            .values()
            .map(|record| SearchHit {
                key: record.key.clone(),
                score: cosine_sim(query_vector, &record.vector),
                source_path: record.source_path.clone(),
                text: record.chunk.text.clone(),
            })
            .collect();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn stats(&self) -> Result<StoreStats, IngestError> {
        let stored = self.read()?;
        Ok(StoreStats {
            total_vectors: stored.len() as u64,
            dimensions: stored.values().next().map(|record| record.vector.len()),
        })
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identify;
    use crate::Chunk;
    use chrono::{Duration, Utc};

    fn record(file_hash: &FileHash, index: u64, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            key: RecordKey::new(file_hash.clone(), index),
            chunk: Chunk {
                index,
                start_offset: 0,
                end_offset: text.chars().count(),
                text: text.to_string(),
                overlap_with_previous: 0,
            },
            vector,
            source_path: "manual.pdf".to_string(),
            title: None,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_keys() -> Result<(), IngestError> {
        let store = InMemoryVectorStore::new();
        let hash = identify(b"doc");
        store.upsert(&[record(&hash, 0, "old", vec![1.0, 0.0])]).await?;
        store.upsert(&[record(&hash, 0, "new", vec![0.0, 1.0])]).await?;

        let records = store.records_for(&hash);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chunk.text, "new");
        Ok(())
    }

    #[tokio::test]
    async fn delete_unknown_hash_is_not_found() -> Result<(), IngestError> {
        let store = InMemoryVectorStore::new();
        let hash = identify(b"doc");
        store
            .upsert(&[
                record(&hash, 0, "a", vec![1.0]),
                record(&hash, 1, "b", vec![1.0]),
            ])
            .await?;

        assert_eq!(store.delete_by_hash(&hash).await?, 2);
        assert!(matches!(
            store.delete_by_hash(&hash).await,
            Err(IngestError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn hash_for_source_prefers_most_recent_ingestion() -> Result<(), IngestError> {
        let store = InMemoryVectorStore::new();
        let old = identify(b"v1");
        let new = identify(b"v2");
        let mut stale = record(&old, 0, "v1", vec![1.0]);
        stale.ingested_at = Utc::now() - Duration::hours(1);
        store.upsert(&[stale, record(&new, 0, "v2", vec![1.0])]).await?;

        assert_eq!(store.hash_for_source("manual.pdf").await?, Some(new));
        assert_eq!(store.hash_for_source("other.pdf").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() -> Result<(), IngestError> {
        let store = InMemoryVectorStore::new();
        let hash = identify(b"doc");
        store
            .upsert(&[
                record(&hash, 0, "east", vec![1.0, 0.0]),
                record(&hash, 1, "north", vec![0.0, 1.0]),
                record(&hash, 2, "north-east", vec![0.7, 0.7]),
            ])
            .await?;

        let hits = store.search(&[0.0, 1.0], 2).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "north");
        assert_eq!(hits[1].text, "north-east");

        let stats = store.stats().await?;
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.dimensions, Some(2));
        Ok(())
    }
}
