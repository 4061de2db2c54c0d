//! Chroma REST client (v1 API).
//!
//! The collection id is resolved once via get-or-create and cached.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{Document, ScoredDocument, VectorError, check_status};
use crate::embeddings::Embedding;

#[derive(Debug, Clone)]
pub struct ChromaStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    collection_id: Arc<OnceCell<String>>,
}

impl ChromaStore {
    pub fn new(
        base_url: String,
        collection: String,
        api_key: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, VectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| VectorError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            api_key,
            collection_id: Arc::new(OnceCell::new()),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(format!("{}/api/v1{path}", self.base_url));
        match &self.api_key {
            Some(key) => req.header("X-Chroma-Token", key),
            None => req,
        }
    }

    async fn collection_id(&self) -> Result<&str, VectorError> {
        self.collection_id
            .get_or_try_init(|| async {
                let response = self
                    .post("/collections")
                    .json(&CreateCollection {
                        name: &self.collection,
                        get_or_create: true,
                    })
                    .send()
                    .await
                    .map_err(|e| VectorError::Request(format!("chroma collection: {e}")))?;
                let parsed: Collection = check_status("chroma", response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| VectorError::Request(format!("chroma collection response: {e}")))?;
                debug!(collection = %self.collection, id = %parsed.id, "chroma collection ready");
                Ok(parsed.id)
            })
            .await
            .map(String::as_str)
    }

    pub async fn upsert(
        &self,
        docs: &[Document],
        embeddings: &[Embedding],
    ) -> Result<usize, VectorError> {
        let id = self.collection_id().await?;
        let body = AddRequest {
            ids: docs
                .iter()
                .map(|_| uuid::Uuid::new_v4().to_string())
                .collect(),
            embeddings,
            documents: docs.iter().map(|d| d.page_content.as_str()).collect(),
            metadatas: docs.iter().map(|d| &d.metadata).collect(),
        };
        let response = self
            .post(&format!("/collections/{id}/add"))
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Request(format!("chroma add: {e}")))?;
        check_status("chroma", response).await?;
        Ok(docs.len())
    }

    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorError> {
        let id = self.collection_id().await?;
        let body = QueryRequest {
            query_embeddings: [embedding],
            n_results: k,
            include: ["documents", "metadatas", "distances"],
        };
        let response = self
            .post(&format!("/collections/{id}/query"))
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Request(format!("chroma query: {e}")))?;
        let parsed: QueryResponse = check_status("chroma", response)
            .await?
            .json()
            .await
            .map_err(|e| VectorError::Request(format!("chroma query response: {e}")))?;
        Ok(from_query(parsed))
    }
}

/// Chroma answers one row per query embedding; only the first is used.
/// Distances convert to a similarity where higher is closer.
fn from_query(parsed: QueryResponse) -> Vec<ScoredDocument> {
    let documents = parsed.documents.into_iter().next().unwrap_or_default();
    let mut metadatas = parsed
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default()
        .into_iter();
    let mut distances = parsed
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default()
        .into_iter();

    documents
        .into_iter()
        .filter_map(|text| {
            let metadata = metadatas.next().flatten().unwrap_or_default();
            let distance = distances.next().unwrap_or(0.0);
            text.map(|page_content| ScoredDocument {
                document: Document {
                    page_content,
                    metadata,
                },
                score: 1.0 - distance,
            })
        })
        .collect()
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateCollection<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct Collection {
    id: String,
}

#[derive(Debug, Serialize)]
struct AddRequest<'a> {
    ids: Vec<String>,
    embeddings: &'a [Embedding],
    documents: Vec<&'a str>,
    metadatas: Vec<&'a Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}
