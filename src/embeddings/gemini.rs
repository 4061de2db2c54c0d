//! Gemini embeddings: `:embedContent` for one text, `:batchEmbedContents`
//! for many (at most [`MAX_BATCH`] per request).

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Embedding, EmbeddingError};

/// Upper bound the API accepts for one `batchEmbedContents` call.
const MAX_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    dimensions: usize,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(
        api_base_url: String,
        model: String,
        dimensions: usize,
        timeout_seconds: u64,
        api_key: String,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EmbeddingError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            model,
            dimensions,
            api_key,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model.trim_start_matches("models/"))
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/{}:{method}", self.api_base_url, self.model_path())
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<R, EmbeddingError> {
        let response = self
            .client
            .post(self.endpoint(method))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            warn!(%status, method, "Gemini embedding request failed");
            return Err(EmbeddingError::Request(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| EmbeddingError::Request(format!("failed to parse response: {e}")))
    }

    fn checked(&self, values: Vec<f32>) -> Result<Embedding, EmbeddingError> {
        if values.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: values.len(),
            });
        }
        Ok(values)
    }

    pub async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let request = EmbedRequest {
            model: None,
            content: EmbedContent::of(text),
        };
        let parsed: EmbedResponse = self.post("embedContent", &request).await?;
        self.checked(parsed.embedding.values)
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let model = self.model_path();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            let request = BatchRequest {
                requests: chunk
                    .iter()
                    .map(|text| EmbedRequest {
                        model: Some(model.as_str()),
                        content: EmbedContent::of(text),
                    })
                    .collect(),
            };
            let parsed: BatchResponse = self.post("batchEmbedContents", &request).await?;
            if parsed.embeddings.len() != chunk.len() {
                return Err(EmbeddingError::Request(format!(
                    "batch returned {} embeddings for {} texts",
                    parsed.embeddings.len(),
                    chunk.len()
                )));
            }
            for values in parsed.embeddings {
                out.push(self.checked(values.values)?);
            }
        }
        debug!(count = out.len(), model = %self.model, "embedded batch");
        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    content: EmbedContent<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

impl<'a> EmbedContent<'a> {
    fn of(text: &'a str) -> Self {
        Self {
            parts: [EmbedPart { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<EmbedValues>,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_accepts_prefixed_model() {
        let e = GeminiEmbedder::new(
            "https://generativelanguage.googleapis.com".into(),
            "models/embedding-001".into(),
            768,
            5,
            "k".into(),
        )
        .unwrap();
        assert_eq!(
            e.endpoint("embedContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/embedding-001:embedContent"
        );
        assert_eq!(
            e.endpoint("batchEmbedContents"),
            "https://generativelanguage.googleapis.com/v1beta/models/embedding-001:batchEmbedContents"
        );
    }

    #[test]
    fn batch_request_names_model_per_entry() {
        let texts = ["alpha".to_string(), "beta".to_string()];
        let request = BatchRequest {
            requests: texts
                .iter()
                .map(|t| EmbedRequest {
                    model: Some("models/embedding-001"),
                    content: EmbedContent::of(t),
                })
                .collect(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["requests"][1]["model"], "models/embedding-001");
        assert_eq!(json["requests"][1]["content"]["parts"][0]["text"], "beta");

        let single = serde_json::to_value(EmbedRequest {
            model: None,
            content: EmbedContent::of("x"),
        })
        .unwrap();
        assert!(single.get("model").is_none());
    }

    #[test]
    fn parses_batch_response() {
        let parsed: BatchResponse = serde_json::from_str(
            r#"{"embeddings": [{"values": [0.1, 0.2]}, {"values": [0.3, 0.4]}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1].values, vec![0.3, 0.4]);
    }

    #[test]
    fn parses_embedding_values() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"embedding": {"values": [0.1, -0.2, 0.3]}}"#).unwrap();
        assert_eq!(parsed.embedding.values.len(), 3);
    }
}
