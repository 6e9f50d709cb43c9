//! Embedding providers
//!
//! Supports:
//! - No-op (lexical-only operation)
//! - Hash-based fallback (offline, deterministic, lower quality)
//! - OpenAI-compatible, Ollama and Google Gemini HTTP APIs

pub mod providers;

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::playbook::Playbook;

pub use providers::{build_provider, GoogleEmbedder, OllamaEmbedder, OpenAiEmbedder};

/// Turns text into a vector
///
/// An empty vector means "no embedding"; callers then rely on lexical
/// search alone.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Vector size, or 0 when unknown or disabled
    fn dimensions(&self) -> usize;
}

/// Always returns an empty vector
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmbedder;

#[async_trait]
impl EmbeddingProvider for NoopEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "noop"
    }

    fn dimensions(&self) -> usize {
        0
    }
}

/// Bag-of-words hashing into a fixed number of dimensions
///
/// Texts sharing words get similar vectors, which is enough for offline
/// use and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dims: usize,
}

pub const DEFAULT_HASH_DIMENSIONS: usize = 384;

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSIONS)
    }
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dims];

        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();

            let slot = (hash % self.dims as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[slot] += sign;
        }

        let mag: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > 0.0 {
            for val in embedding.iter_mut() {
                *val /= mag;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Canonical text embedded for a playbook
///
/// The same text shape is used at index and query time.
pub fn text_for_playbook(pb: &Playbook) -> String {
    let mut parts = Vec::new();

    if !pb.name.is_empty() {
        parts.push(pb.name.clone());
    }
    if !pb.description.is_empty() {
        parts.push(pb.description.clone());
    }
    if !pb.tags.is_empty() {
        parts.push(format!("tags: {}", pb.tags.join(", ")));
    }
    let actions: Vec<&str> = pb
        .steps
        .iter()
        .map(|s| s.action.as_str())
        .filter(|a| !a.is_empty())
        .collect();
    if !actions.is_empty() {
        parts.push(format!("steps: {}", actions.join("; ")));
    }

    parts.join("\n")
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
