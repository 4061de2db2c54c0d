//! Vector store clients.
//!
//! Indexing itself lives in external services; this module only speaks their
//! REST data planes. `Memory` is a process-local brute-force store used by
//! tests and the offline (`dummy`) setup.

mod chroma;
mod memory;
mod pinecone;

pub use chroma::ChromaStore;
pub use memory::MemoryStore;
pub use pinecone::PineconeStore;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::config::{Secrets, StoreConfig};
use crate::embeddings::Embedding;

/// Metadata key under which chunk text is stored in stores that only keep
/// metadata (Pinecone).
pub const TEXT_KEY: &str = "page_content";

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("unknown vector store kind: {0}")]
    UnknownKind(String),
    #[error("missing api key for vector store: {0}")]
    MissingApiKey(String),
    #[error("{0} documents but {1} embeddings")]
    LengthMismatch(usize, usize),
    #[error("vector store request failed: {0}")]
    Request(String),
}

/// A chunk of text plus free-form metadata (`source`, `file_name`, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// String metadata value, or `None` when absent or not a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Metadata value rendered as text (numbers included).
    pub fn meta_display(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    /// Store-native similarity; higher is closer.
    pub score: f32,
}

#[derive(Debug, Clone)]
pub enum VectorStore {
    Pinecone(PineconeStore),
    Chroma(ChromaStore),
    Memory(MemoryStore),
}

impl VectorStore {
    /// Insert `docs` with their precomputed `embeddings` (same order, same length).
    pub async fn upsert(
        &self,
        docs: &[Document],
        embeddings: &[Embedding],
    ) -> Result<usize, VectorError> {
        if docs.len() != embeddings.len() {
            return Err(VectorError::LengthMismatch(docs.len(), embeddings.len()));
        }
        if docs.is_empty() {
            return Ok(0);
        }
        match self {
            VectorStore::Pinecone(s) => s.upsert(docs, embeddings).await,
            VectorStore::Chroma(s) => s.upsert(docs, embeddings).await,
            VectorStore::Memory(s) => Ok(s.upsert(docs, embeddings).await),
        }
    }

    /// Top-`k` documents closest to `embedding`, best first.
    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorError> {
        match self {
            VectorStore::Pinecone(s) => s.query(embedding, k).await,
            VectorStore::Chroma(s) => s.query(embedding, k).await,
            VectorStore::Memory(s) => Ok(s.query(embedding, k).await),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VectorStore::Pinecone(_) => "pinecone",
            VectorStore::Chroma(_) => "chroma",
            VectorStore::Memory(_) => "memory",
        }
    }
}

/// Construct a store client from its config entry.
pub fn build(config: &StoreConfig, secrets: &Secrets) -> Result<VectorStore, VectorError> {
    match config.kind.as_str() {
        "pinecone" => {
            let key = secrets
                .pinecone_api_key
                .clone()
                .ok_or_else(|| VectorError::MissingApiKey(config.name.clone()))?;
            Ok(VectorStore::Pinecone(PineconeStore::new(
                config.url.clone(),
                config.namespace.clone(),
                key,
                config.timeout_seconds,
            )?))
        }
        "chroma" => Ok(VectorStore::Chroma(ChromaStore::new(
            config.url.clone(),
            config
                .collection
                .clone()
                .unwrap_or_else(|| config.name.clone()),
            secrets.chroma_api_key.clone(),
            config.timeout_seconds,
        )?)),
        "memory" => Ok(VectorStore::Memory(MemoryStore::default())),
        other => Err(VectorError::UnknownKind(other.to_string())),
    }
}

/// Map a failed HTTP response into a `VectorError` carrying status and body.
async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, VectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    tracing::error!(service, %status, "vector store returned HTTP error");
    Err(VectorError::Request(format!("{service} HTTP {status}: {body}")))
}
