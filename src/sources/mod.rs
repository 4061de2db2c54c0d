//! Ingestion sources.
//!
//! Each source pulls raw content from one external service and either
//! archives it in [`Storage`](crate::storage::Storage) (Slack, ClickUp) or
//! chunks, embeds and upserts it into a vector store (Gmail, Drive,
//! meetings). Every sync is incremental: trackers record what was already
//! seen.

pub mod clickup;
pub mod drive;
pub mod extract;
pub mod gmail;
pub mod google_auth;
pub mod meetings;
pub mod slack;

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::embeddings::EmbeddingError;
use crate::llm::ProviderError;
use crate::services::Services;
use crate::storage::StorageError;
use crate::trackers::TrackerError;
use crate::vector::{Document, VectorError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("missing credential: {0}")]
    MissingCredential(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("auth failed: {0}")]
    Auth(String),
    #[error("{service} request failed: {message}")]
    Http { service: &'static str, message: String },
    #[error("{service} api error: {message}")]
    Api { service: &'static str, message: String },
    #[error("unknown vector store: {0}")]
    UnknownStore(String),
    #[error("chunking failed: {0}")]
    Chunk(String),
    #[error("text extraction failed: {0}")]
    Extract(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Llm(#[from] ProviderError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl SourceError {
    pub(crate) fn http(service: &'static str, e: impl std::fmt::Display) -> Self {
        SourceError::Http {
            service,
            message: e.to_string(),
        }
    }

    pub(crate) fn api(service: &'static str, message: impl Into<String>) -> Self {
        SourceError::Api {
            service,
            message: message.into(),
        }
    }
}

/// Outcome counters returned by every sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Items examined (messages, files, tasks).
    pub seen: usize,
    /// Items skipped because they were already processed or unsupported.
    pub skipped: usize,
    /// Items that failed; the run continued past them.
    pub failed: usize,
    /// Documents, messages or tasks written.
    pub written: usize,
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} skipped={} failed={} written={}",
            self.seen, self.skipped, self.failed, self.written
        )
    }
}

pub(crate) fn http_client(timeout_seconds: u64) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| SourceError::http("client", format!("failed building HTTP client: {e}")))
}

/// Return the response if it is a 2xx, else an `Api` error with the body.
pub(crate) async fn check_response(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(SourceError::api(service, format!("HTTP {status}: {body}")))
}

/// Embed `docs` and upsert them into the named vector store.
pub(crate) async fn store_documents(
    services: &Services,
    store_name: &str,
    docs: &[Document],
) -> Result<usize, SourceError> {
    if docs.is_empty() {
        return Ok(0);
    }
    let store = services
        .store(store_name)
        .ok_or_else(|| SourceError::UnknownStore(store_name.to_string()))?;
    let texts: Vec<String> = docs.iter().map(|d| d.page_content.clone()).collect();
    let embeddings = services.embedder.embed_batch(&texts).await?;
    let written = store.upsert(docs, &embeddings).await?;
    debug!(store = store_name, written, "stored documents");
    Ok(written)
}
