//! Text embedding providers.
//!
//! The [`Embedder`] trait is the seam to the external embedding service. The
//! engine never computes embeddings itself; it only caches and compares them.
//!
//! # Implementations
//!
//! - [`OpenAiEmbedder`]: any OpenAI-compatible `/embeddings` endpoint
//! - [`MockEmbedder`]: deterministic hash-based vectors for tests
//! - [`TableEmbedder`]: fixed text → vector table, for tests that need exact geometry

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{LlmError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for generating text embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in a batch.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimensionality of the vectors this embedder produces.
    fn dimensions(&self) -> usize;

    /// Provider name, used in logs.
    fn name(&self) -> &str;
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic embedder: the same text always yields the same unit vector.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vector(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn hash_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let mut state = simple_hash(text);
    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        embedding.push(((state >> 16) as u16 as f32 / 32768.0) - 1.0);
    }
    normalize(&mut embedding);
    embedding
}

/// djb2 over the UTF-8 bytes.
fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

// ─────────────────────────────────────────────────────────────────────────────
// Table Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Embedder backed by an explicit text → vector table.
///
/// Unknown texts fail with [`LlmError::UnknownInput`] unless a fallback is
/// configured, in which case they get a deterministic hash vector. Every call
/// is counted so cache behaviour can be observed.
#[derive(Debug, Default)]
pub struct TableEmbedder {
    dimensions: usize,
    table: Mutex<HashMap<String, Vec<f32>>>,
    fallback: bool,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Default::default()
        }
    }

    /// Hash unknown texts instead of failing.
    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// Register the vector returned for `text`.
    pub fn with(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.insert(text, vector);
        self
    }

    pub fn insert(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.table.lock().insert(text.into(), vector);
    }

    /// Number of `embed` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(vector) = self.table.lock().get(text) {
            return Ok(vector.clone());
        }
        if self.fallback {
            Ok(hash_vector(text, self.dimensions))
        } else {
            Err(LlmError::UnknownInput(text.chars().take(40).collect()))
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "table"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for OpenAI-compatible embeddings.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    /// API key for authentication. Local servers may not need one.
    pub api_key: Option<String>,
    /// Base URL for the API.
    pub base_url: String,
    /// Model to use for embeddings.
    pub model: String,
    /// Requested output dimensions.
    pub dimensions: usize,
    /// HTTP client timeout.
    pub timeout: Duration,
}

impl OpenAiEmbedderConfig {
    pub fn new(api_key: Option<String>, dimensions: usize) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// OpenAI embeddings API client.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.config.base_url)
    }

    /// Only the text-embedding-3 family accepts a `dimensions` parameter.
    fn request_dimensions(&self) -> Option<usize> {
        self.config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.config.dimensions)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Backend("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.request_dimensions(),
        };

        let mut builder = self.client.post(self.embeddings_url()).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            model = %self.config.model,
            inputs = texts.len(),
            "Requesting embeddings"
        );

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Serialization(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(LlmError::Backend(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);
        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, serde::Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction from configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Provider-neutral description of the embedder to build.
#[derive(Debug, Clone)]
pub struct EmbedderSpec {
    /// Provider name: "openai" or "mock".
    pub provider: String,
    /// Output dimensions.
    pub dimensions: usize,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Build a [`SharedEmbedder`] from a spec.
pub fn build_embedder(spec: &EmbedderSpec) -> Result<SharedEmbedder> {
    if spec.dimensions == 0 {
        return Err(LlmError::Config(
            "embedding dimensions must be greater than zero".to_string(),
        ));
    }

    match spec.provider.as_str() {
        "openai" => {
            let is_remote = spec
                .base_url
                .as_deref()
                .is_none_or(|url| url.contains("api.openai.com"));
            if is_remote && spec.api_key.is_none() {
                return Err(LlmError::Config(
                    "OpenAI embedding provider requires an API key. \
                     Set OPENAI_API_KEY or configure [embedding] api_key."
                        .to_string(),
                ));
            }
            let mut config = OpenAiEmbedderConfig::new(spec.api_key.clone(), spec.dimensions);
            if let Some(ref model) = spec.model {
                config = config.with_model(model);
            }
            if let Some(ref base_url) = spec.base_url {
                config = config.with_base_url(base_url);
            }
            Ok(Arc::new(OpenAiEmbedder::new(config)?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(spec.dimensions))),
        other => Err(LlmError::Config(format!(
            "Unknown embedding provider '{}'. Expected 'openai' or 'mock'.",
            other
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::default();
        assert_eq!(embedder.dimensions(), 384);
        assert_eq!(embedder.name(), "mock");

        let embedding = embedder.embed("hello world").await.unwrap();
        assert_eq!(embedding.len(), 384);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(16);
        let e1 = embedder.embed("疫苗间隔").await.unwrap();
        let e2 = embedder.embed("疫苗间隔").await.unwrap();
        let e3 = embedder.embed("手术风险").await.unwrap();
        assert_eq!(e1, e2);
        assert_ne!(e1, e3);
    }

    #[tokio::test]
    async fn test_table_embedder_lookup_and_count() {
        let embedder = TableEmbedder::new(2).with("a", vec![1.0, 0.0]);
        assert_eq!(embedder.embed("a").await.unwrap(), vec![1.0, 0.0]);
        assert!(matches!(
            embedder.embed("b").await,
            Err(LlmError::UnknownInput(_))
        ));
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_table_embedder_fallback() {
        let embedder = TableEmbedder::new(8).with_fallback();
        let v = embedder.embed("anything").await.unwrap();
        assert_eq!(v.len(), 8);
    }

    #[tokio::test]
    async fn test_embed_batch_default() {
        let embedder = MockEmbedder::new(4);
        let batch = embedder.embed_batch(&["a", "b"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("a").await.unwrap());
    }

    #[test]
    fn test_build_embedder() {
        let spec = EmbedderSpec {
            provider: "mock".to_string(),
            dimensions: 32,
            api_key: None,
            model: None,
            base_url: None,
        };
        let embedder = build_embedder(&spec).unwrap();
        assert_eq!(embedder.dimensions(), 32);
        assert_eq!(embedder.name(), "mock");

        let missing_key = EmbedderSpec {
            provider: "openai".to_string(),
            ..spec.clone()
        };
        assert!(matches!(
            build_embedder(&missing_key),
            Err(LlmError::Config(_))
        ));

        let local_server = EmbedderSpec {
            provider: "openai".to_string(),
            base_url: Some("http://localhost:11434/v1".to_string()),
            ..spec.clone()
        };
        assert_eq!(build_embedder(&local_server).unwrap().name(), "openai");

        let unknown = EmbedderSpec {
            provider: "onnx".to_string(),
            ..spec.clone()
        };
        assert!(build_embedder(&unknown).is_err());

        let zero = EmbedderSpec {
            dimensions: 0,
            ..spec
        };
        assert!(build_embedder(&zero).is_err());
    }

    #[test]
    fn test_request_dimensions_only_for_v3_models() {
        let config = OpenAiEmbedderConfig::new(Some("k".into()), 256);
        let embedder = OpenAiEmbedder::new(config.clone()).unwrap();
        assert_eq!(embedder.request_dimensions(), Some(256));

        let legacy = OpenAiEmbedder::new(config.with_model("text-embedding-ada-002")).unwrap();
        assert_eq!(legacy.request_dimensions(), None);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
