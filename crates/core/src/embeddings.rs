use crate::error::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Maps an ordered batch of texts to one fixed-dimension vector each.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;
}

/// Offline embedder hashing character trigrams into buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for character in window {
                let mut buffer = [0u8; 4];
                for byte in character.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: Url::parse("https://api.openai.com/v1/")?,
            model: model.into(),
            dimensions,
            timeout: Duration::from_secs(60),
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for the OpenAI-compatible `POST /embeddings` endpoint.
pub struct OpenAiEmbedder {
    config: OpenAiConfig,
    endpoint: Url,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self, IngestError> {
        if config.api_key.trim().is_empty() {
            return Err(IngestError::Configuration(
                "an API key is required for the OpenAI embedder".to_string(),
            ));
        }
        if config.dimensions == 0 {
            return Err(IngestError::Configuration(
                "embedding dimensions must be > 0".to_string(),
            ));
        }

        let endpoint = with_trailing_slash(&config.base_url).join("embeddings")?;
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// Only the text-embedding-3 family accepts a requested dimension.
    fn requested_dimensions(&self) -> Option<usize> {
        self.config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.dimensions)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };

        debug!(model = %self.config.model, batch = texts.len(), "requesting embeddings");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::dependency(
                "openai",
                format!("{status}: {}", body.trim()),
            ));
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_embeddings(payload, texts.len())
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for datum in payload.data {
        let slot = slots.get_mut(datum.index).ok_or_else(|| {
            IngestError::dependency(
                "openai",
                format!("embedding index {} out of range for {expected} inputs", datum.index),
            )
        })?;
        *slot = Some(datum.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                IngestError::dependency("openai", format!("missing embedding for input {index}"))
            })
        })
        .collect()
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
