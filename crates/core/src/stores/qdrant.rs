use crate::traits::VectorStore;
use crate::{EmbeddingRecord, FileHash, IngestError, RecordKey, SearchHit, StoreStats};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "qdrant";
const UPSERT_BATCH: usize = 100;
const SCROLL_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_size: usize,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> Result<Self, IngestError> {
        Url::parse(&config.endpoint)?;
        if config.collection.trim().is_empty() {
            return Err(IngestError::Configuration(
                "qdrant collection name is empty".to_string(),
            ));
        }

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            collection: config.collection,
            client: Client::builder().timeout(config.timeout).build()?,
            vector_size: config.vector_size,
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// Checks that the collection exists and matches the configured vector size.
    pub async fn ensure_collection(&self) -> Result<(), IngestError> {
        let stats = self.stats().await?;
        match stats.dimensions {
            Some(size) if size != self.vector_size => Err(IngestError::Configuration(format!(
                "collection {} stores {size}-dimensional vectors, embedder produces {}",
                self.collection, self.vector_size
            ))),
            _ => {
                info!(
                    collection = %self.collection,
                    vectors = stats.total_vectors,
                    "using qdrant collection"
                );
                Ok(())
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/collections/{}{}", self.endpoint, self.collection, path);
        let request = self.client.request(method, url);
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, IngestError> {
        let response = request.send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn count_hash(&self, file_hash: &FileHash) -> Result<u64, IngestError> {
        let body = json!({
            "filter": match_filter("file_hash", file_hash.as_str()),
            "exact": true,
        });
        let parsed = self
            .send(self.request(Method::POST, "/points/count").json(&body))
            .await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| IngestError::dependency(BACKEND, "count response has no result.count"))
    }

    fn point(&self, record: &EmbeddingRecord) -> Result<Value, IngestError> {
        if record.vector.len() != self.vector_size {
            return Err(IngestError::Dependency(format!(
                "embedding dimension {} != {}",
                record.vector.len(),
                self.vector_size
            )));
        }

        Ok(json!({
            "id": record.key.point_id().to_string(),
            "vector": record.vector,
            "payload": {
                "file_hash": record.key.file_hash,
                "chunk_index": record.key.chunk_index,
                "source_path": record.source_path,
                "title": record.title,
                "start_offset": record.chunk.start_offset,
                "end_offset": record.chunk.end_offset,
                "overlap_with_previous": record.chunk.overlap_with_previous,
                "text": record.chunk.text,
                "ingested_at": record.ingested_at.to_rfc3339(),
            },
        }))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn contains_hash(&self, file_hash: &FileHash) -> Result<bool, IngestError> {
        Ok(self.count_hash(file_hash).await? > 0)
    }

    async fn hash_for_source(&self, source_path: &str) -> Result<Option<FileHash>, IngestError> {
        let mut points = Vec::new();
        let mut offset = None;

        loop {
            let parsed = self
                .send(
                    self.request(Method::POST, "/points/scroll")
                        .json(&scroll_body(source_path, offset.as_ref())),
                )
                .await?;

            if let Some(page) = parsed.pointer("/result/points").and_then(Value::as_array) {
                points.extend(page.iter().cloned());
            }
            offset = parsed
                .pointer("/result/next_page_offset")
                .filter(|next| !next.is_null())
                .cloned();
            if offset.is_none() {
                break;
            }
        }

        debug!(source_path, points = points.len(), "scrolled source points");
        Ok(latest_hash(&points))
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<usize, IngestError> {
        let points = records
            .iter()
            .map(|record| self.point(record))
            .collect::<Result<Vec<_>, IngestError>>()?;

        for batch in points.chunks(UPSERT_BATCH) {
            self.send(
                self.request(Method::PUT, "/points?wait=true")
                    .json(&json!({ "points": batch })),
            )
            .await?;
            debug!(collection = %self.collection, points = batch.len(), "upserted batch");
        }

        Ok(points.len())
    }

    async fn delete_by_hash(&self, file_hash: &FileHash) -> Result<usize, IngestError> {
        let existing = self.count_hash(file_hash).await?;
        if existing == 0 {
            return Err(IngestError::NotFound(format!(
                "no vectors stored for file hash {file_hash}"
            )));
        }

        self.send(
            self.request(Method::POST, "/points/delete?wait=true")
                .json(&json!({ "filter": match_filter("file_hash", file_hash.as_str()) })),
        )
        .await?;

        Ok(existing as usize)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IngestError> {
        if query_vector.len() != self.vector_size {
            return Err(IngestError::Configuration(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let parsed = self
            .send(self.request(Method::POST, "/points/search").json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            })))
            .await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().filter_map(parse_hit).collect())
    }

    async fn stats(&self) -> Result<StoreStats, IngestError> {
        let parsed = self.send(self.request(Method::GET, "")).await?;
        Ok(StoreStats {
            total_vectors: parsed
                .pointer("/result/points_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            dimensions: parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .map(|size| size as usize),
        })
    }
}

async fn check_status(response: Response) -> Result<Response, IngestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IngestError::dependency(BACKEND, format!("{status}: {}", body.trim())))
}

fn match_filter(key: &str, value: &str) -> Value {
    json!({ "must": [{ "key": key, "match": { "value": value } }] })
}

fn scroll_body(source_path: &str, offset: Option<&Value>) -> Value {
    let mut body = json!({
        "filter": match_filter("source_path", source_path),
        "limit": SCROLL_PAGE_SIZE,
        "with_payload": ["file_hash", "ingested_at"],
        "with_vector": false,
    });
    if let Some(offset) = offset {
        body["offset"] = offset.clone();
    }
    body
}

fn latest_hash(points: &[Value]) -> Option<FileHash> {
    points
        .iter()
        .filter_map(|point| {
            let hash = point
                .pointer("/payload/file_hash")
                .and_then(Value::as_str)?
                .parse::<FileHash>()
                .ok()?;
            let ingested_at = point
                .pointer("/payload/ingested_at")
                .and_then(Value::as_str)
                .and_then(|value| chrono::DateTime::parse_from_rfc3339(value).ok());
            Some((ingested_at, hash))
        })
        .max_by(|left, right| left.0.cmp(&right.0))
        .map(|(_, hash)| hash)
}

fn parse_hit(hit: &Value) -> Option<SearchHit> {
    let file_hash = hit
        .pointer("/payload/file_hash")
        .and_then(Value::as_str)?
        .parse::<FileHash>()
        .ok()?;
    let chunk_index = hit.pointer("/payload/chunk_index").and_then(Value::as_u64)?;

    Some(SearchHit {
        key: RecordKey::new(file_hash, chunk_index),
        score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
        source_path: hit
            .pointer("/payload/source_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        text: hit
            .pointer("/payload/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
