use crate::chunking::ChunkingConfig;
use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Hex SHA-256 digest of a file's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    pub(crate) fn from_digest_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for FileHash {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileHash {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.len() != 64 || !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(IngestError::Configuration(format!(
                "file hash must be 64 hex digits, got {value:?}"
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionMetadata {
    pub page_count: u32,
    pub title: Option<String>,
}

/// Text extracted from a PDF before it is bound to a file identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub metadata: ExtractionMetadata,
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub file_hash: FileHash,
    pub source_path: String,
    pub byte_size: u64,
    pub text: String,
    pub metadata: ExtractionMetadata,
}

/// A window of a document's text. Offsets count chars, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u64,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub overlap_with_previous: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub file_hash: FileHash,
    pub chunk_index: u64,
}

impl RecordKey {
    pub fn new(file_hash: FileHash, chunk_index: u64) -> Self {
        Self {
            file_hash,
            chunk_index,
        }
    }

    /// Deterministic point id; the same key always maps to the same UUID.
    pub fn point_id(&self) -> Uuid {
        let name = format!("{}:{}", self.file_hash, self.chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub key: RecordKey,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub source_path: String,
    pub title: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

/// Pipeline step a document failed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identify,
    Extract,
    Chunk,
    Embed,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identify => "identify",
            Self::Extract => "extract",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Store => "store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Stored,
    Skipped,
    Failed {
        stage: Stage,
        kind: crate::error::ErrorKind,
        cause: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub source_path: PathBuf,
    pub document_id: Option<FileHash>,
    pub chunk_count: usize,
    pub outcome: Outcome,
    /// Hash whose records were removed because this file replaced them.
    pub replaced: Option<FileHash>,
    pub elapsed_ms: u64,
}

impl IngestionResult {
    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.outcome {
            Outcome::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// What to do with records of a file's previous content when the file changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Delete the previous hash's records after the new ones are stored.
    #[default]
    Replace,
    /// Keep both versions.
    Retain,
}

impl FromStr for StalePolicy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "retain" => Ok(Self::Retain),
            other => Err(IngestError::Configuration(format!(
                "unknown stale policy {other:?}, expected replace or retain"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
    pub max_file_size_bytes: u64,
    pub stale_policy: StalePolicy,
    /// Documents processed at once by directory and batch runs.
    pub concurrency: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            embedding_batch_size: 100,
            max_file_size_bytes: 50 * 1024 * 1024,
            stale_policy: StalePolicy::Replace,
            concurrency: 1,
        }
    }
}

impl IngestionOptions {
    pub fn validate(&self) -> Result<ChunkingConfig, IngestError> {
        if self.embedding_batch_size == 0 {
            return Err(IngestError::Configuration(
                "embedding batch size must be > 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(IngestError::Configuration(
                "concurrency must be > 0".to_string(),
            ));
        }
        if self.max_file_size_bytes == 0 {
            return Err(IngestError::Configuration(
                "max file size must be > 0".to_string(),
            ));
        }
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: RecordKey,
    pub score: f32,
    pub source_path: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total_vectors: u64,
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub store: StoreStats,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}
