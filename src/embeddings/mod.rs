//! Embedding provider abstraction.
//!
//! Same shape as [`crate::llm`]: an enum over concrete backends, built once
//! at startup by [`build`] and cloned wherever vectors are needed.

mod dummy;
mod gemini;

pub use dummy::DummyEmbedder;
pub use gemini::GeminiEmbedder;

use thiserror::Error;

use crate::core::config::EmbeddingsConfig;

pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
    #[error("missing api key for embedding provider: {0}")]
    MissingApiKey(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    Dummy(DummyEmbedder),
    Gemini(GeminiEmbedder),
}

impl EmbeddingProvider {
    pub async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        match self {
            EmbeddingProvider::Dummy(p) => Ok(p.embed(text)),
            EmbeddingProvider::Gemini(p) => p.embed(text).await,
        }
    }

    /// Embed several texts, preserving order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        match self {
            EmbeddingProvider::Dummy(p) => Ok(texts.iter().map(|t| p.embed(t)).collect()),
            EmbeddingProvider::Gemini(p) => p.embed_batch(texts).await,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            EmbeddingProvider::Dummy(p) => p.dimensions(),
            EmbeddingProvider::Gemini(p) => p.dimensions(),
        }
    }
}

/// Construct the configured embedder. `api_key` comes from `GOOGLE_API_KEY`.
pub fn build(
    config: &EmbeddingsConfig,
    api_key: Option<String>,
) -> Result<EmbeddingProvider, EmbeddingError> {
    match config.provider.as_str() {
        "dummy" => Ok(EmbeddingProvider::Dummy(DummyEmbedder::new(config.dimensions))),
        "gemini" => {
            let key = api_key.ok_or_else(|| EmbeddingError::MissingApiKey("gemini".into()))?;
            Ok(EmbeddingProvider::Gemini(GeminiEmbedder::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.dimensions,
                config.timeout_seconds,
                key,
            )?))
        }
        other => Err(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn build_dummy_and_embed_batch() {
        let cfg = Config::test_default(std::path::Path::new("/tmp"));
        let p = build(&cfg.embeddings, None).unwrap();
        let out = p
            .embed_batch(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), p.dimensions());
    }

    #[test]
    fn gemini_without_key_errors() {
        let mut cfg = Config::test_default(std::path::Path::new("/tmp"));
        cfg.embeddings.provider = "gemini".into();
        assert!(matches!(
            build(&cfg.embeddings, None),
            Err(EmbeddingError::MissingApiKey(_))
        ));
    }
}
