mod ollama;

pub use ollama::OllamaEmbedder;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

/// Encodes text into fixed-length vectors. Implementations must return the
/// same dimension for every call and a stable model identifier; the
/// identifier is written into the artifact metadata and checked at query
/// time.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    /// Model identifier, e.g. `"nomic-embed-text"`.
    fn model(&self) -> &str;
    async fn health_check(&self) -> Result<()>;
}

pub fn create_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    Box::new(OllamaEmbedder::new(
        &config.endpoint,
        &config.model,
        config.dimensions,
    ))
}
