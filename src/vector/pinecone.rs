//! Pinecone data-plane client (`/vectors/upsert`, `/query`).
//!
//! Pinecone stores metadata only, so chunk text travels under
//! [`TEXT_KEY`] and is lifted back out on query.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{Document, ScoredDocument, TEXT_KEY, VectorError, check_status};
use crate::embeddings::Embedding;

/// Pinecone caps upsert requests; stay well under the 2 MB limit.
const UPSERT_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct PineconeStore {
    client: Client,
    /// Index host, e.g. `https://drive-abc123.svc.us-east1-aws.pinecone.io`.
    host: String,
    namespace: Option<String>,
    api_key: String,
}

impl PineconeStore {
    pub fn new(
        host: String,
        namespace: Option<String>,
        api_key: String,
        timeout_seconds: u64,
    ) -> Result<Self, VectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| VectorError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            namespace,
            api_key,
        })
    }

    pub async fn upsert(
        &self,
        docs: &[Document],
        embeddings: &[Embedding],
    ) -> Result<usize, VectorError> {
        let vectors: Vec<UpsertVector> = docs
            .iter()
            .zip(embeddings)
            .map(|(doc, values)| UpsertVector {
                id: uuid::Uuid::new_v4().to_string(),
                values: values.clone(),
                metadata: to_metadata(doc),
            })
            .collect();

        let mut written = 0;
        for batch in vectors.chunks(UPSERT_BATCH) {
            let body = UpsertRequest {
                vectors: batch,
                namespace: self.namespace.as_deref(),
            };
            let response = self
                .client
                .post(format!("{}/vectors/upsert", self.host))
                .header("Api-Key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| VectorError::Request(format!("pinecone upsert: {e}")))?;
            let parsed: UpsertResponse = check_status("pinecone", response)
                .await?
                .json()
                .await
                .map_err(|e| VectorError::Request(format!("pinecone upsert response: {e}")))?;
            written += parsed.upserted_count;
        }
        debug!(host = %self.host, written, "pinecone upsert done");
        Ok(written)
    }

    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorError> {
        let body = QueryRequest {
            vector: embedding,
            top_k: k,
            include_metadata: true,
            namespace: self.namespace.as_deref(),
        };
        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Request(format!("pinecone query: {e}")))?;
        let parsed: QueryResponse = check_status("pinecone", response)
            .await?
            .json()
            .await
            .map_err(|e| VectorError::Request(format!("pinecone query response: {e}")))?;
        Ok(from_matches(parsed.matches))
    }
}

/// Flatten a document into Pinecone metadata. Nulls are dropped because
/// Pinecone rejects them.
fn to_metadata(doc: &Document) -> Map<String, Value> {
    let mut meta: Map<String, Value> = doc
        .metadata
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    meta.insert(TEXT_KEY.to_string(), Value::String(doc.page_content.clone()));
    meta
}

fn from_matches(matches: Vec<Match>) -> Vec<ScoredDocument> {
    matches
        .into_iter()
        .filter_map(|m| {
            let mut metadata = m.metadata.unwrap_or_default();
            let text = match metadata.remove(TEXT_KEY) {
                Some(Value::String(s)) => s,
                _ => return None,
            };
            Some(ScoredDocument {
                document: Document {
                    page_content: text,
                    metadata,
                },
                score: m.score,
            })
        })
        .collect()
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct UpsertVector {
    id: String,
    values: Vec<f32>,
    metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [UpsertVector],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct Match {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}
