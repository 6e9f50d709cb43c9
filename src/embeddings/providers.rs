//! HTTP embedding providers
//!
//! One `reqwest` client per provider with a fixed timeout. No retries: a
//! failed call is reported to the caller, which decides whether to degrade.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{EmbeddingProvider, HashEmbedder, NoopEmbedder, DEFAULT_HASH_DIMENSIONS};
use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::{PlaybookError, Result};

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "nomic-embed-text-v2-moe";
pub const GOOGLE_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GOOGLE_DEFAULT_MODEL: &str = "gemini-embedding-001";

/// Longest error body quoted back in an error message
const MAX_ERROR_BODY: usize = 4096;

/// Build the provider selected by `cfg.provider`
pub fn build_provider(cfg: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match cfg.kind()? {
        ProviderKind::Noop => Arc::new(NoopEmbedder),
        ProviderKind::Hash => Arc::new(HashEmbedder::new(if cfg.dimensions > 0 {
            cfg.dimensions
        } else {
            DEFAULT_HASH_DIMENSIONS
        })),
        ProviderKind::OpenAi => Arc::new(OpenAiEmbedder::new(cfg)?),
        ProviderKind::Ollama => Arc::new(OllamaEmbedder::new(cfg)?),
        ProviderKind::Google => Arc::new(GoogleEmbedder::new(cfg)?),
    };
    info!(
        "Embedding provider: {} (dimensions: {})",
        provider.name(),
        provider.dimensions()
    );
    Ok(provider)
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PlaybookError::embedding("build http client", e))
}

fn or_default(value: &str, default: &str) -> String {
    let value = value.trim().trim_end_matches('/');
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// Cut `body` to at most [`MAX_ERROR_BODY`] bytes on a char boundary
fn excerpt(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Send a request and decode a JSON body, mapping every failure to an embedding error
async fn send_json<T: DeserializeOwned>(provider: &str, request: RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| PlaybookError::embedding(format!("{} request", provider), e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PlaybookError::embedding_msg(format!(
            "{} error (status {}): {}",
            provider,
            status.as_u16(),
            excerpt(&body)
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| PlaybookError::embedding(format!("{} decode response", provider), e))
}

fn to_f32(provider: &str, values: Vec<f64>) -> Result<Vec<f32>> {
    if values.is_empty() {
        return Err(PlaybookError::embedding_msg(format!("{}: no embedding in response", provider)));
    }
    debug!("{} returned {} dimensions", provider, values.len());
    Ok(values.into_iter().map(|v| v as f32).collect())
}

/// OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiData {
    embedding: Vec<f64>,
}

impl OpenAiEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            url: or_default(&cfg.url, OPENAI_DEFAULT_URL),
            api_key: cfg.api_key.clone(),
            model: or_default(&cfg.model, OPENAI_DEFAULT_MODEL),
            dims: cfg.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.url))
            .json(&OpenAiRequest { model: &self.model, input: text });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response: OpenAiResponse = send_json("openai", request).await?;
        let values = response.data.into_iter().next().map(|d| d.embedding).unwrap_or_default();
        to_f32("openai", values)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Local Ollama `/api/embeddings` endpoint
pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
    dims: usize,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    embedding: Vec<f64>,
}

impl OllamaEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            url: or_default(&cfg.url, OLLAMA_DEFAULT_URL),
            model: or_default(&cfg.model, OLLAMA_DEFAULT_MODEL),
            dims: cfg.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&OllamaRequest { model: &self.model, prompt: text });

        let response: OllamaResponse = send_json("ollama", request).await?;
        to_f32("ollama", response.embedding)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Google Gemini `embedContent` endpoint
pub struct GoogleEmbedder {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

#[derive(Debug, Serialize)]
struct GoogleRequest<'a> {
    content: GoogleContent<'a>,
}

#[derive(Debug, Serialize)]
struct GoogleContent<'a> {
    parts: Vec<GooglePart<'a>>,
}

#[derive(Debug, Serialize)]
struct GooglePart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    embedding: GoogleEmbedding,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedding {
    #[serde(default)]
    values: Vec<f64>,
}

impl GoogleEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            url: or_default(&cfg.url, GOOGLE_DEFAULT_URL),
            api_key: cfg.api_key.clone(),
            model: or_default(&cfg.model, GOOGLE_DEFAULT_MODEL),
            dims: cfg.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GoogleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = GoogleRequest {
            content: GoogleContent {
                parts: vec![GooglePart { text }],
            },
        };
        let request = self
            .client
            .post(format!("{}/models/{}:embedContent", self.url, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body);

        let response: GoogleResponse = send_json("google", request).await?;
        to_f32("google", response.embedding.values)
    }

    fn name(&self) -> &str {
        "google"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
