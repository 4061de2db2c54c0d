//! Chat-completions provider for OpenAI and servers that speak the same
//! `/v1/chat/completions` dialect (Ollama, LM Studio, vLLM).
//!
//! Used for project classification, query rewriting, report updates and
//! answers. Each call is a single user turn; no history is kept here.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::core::config::OpenAiConfig;
use crate::llm::{LlmResponse, LlmUsage, ProviderError};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key` is optional so keyless local servers work; when set it is
    /// sent as a bearer token.
    pub fn new(config: &OpenAiConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        // gpt-5 models only accept the default temperature.
        let temperature = (!config.model.starts_with("gpt-5")).then_some(config.temperature);
        Ok(Self {
            client,
            endpoint: config.api_base_url.clone(),
            model: config.model.clone(),
            temperature,
            api_key,
        })
    }

    /// Transport-level reachability. Any HTTP status, 401 included, counts.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        let mut req = self.client.head(&self.endpoint).timeout(PING_TIMEOUT);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(drop)
            .map_err(|e| ProviderError::Request(format!("{} unreachable: {e}", self.endpoint)))
    }

    pub async fn complete(
        &self,
        content: &str,
        system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        let messages: Vec<ChatMessage<'_>> = system
            .map(|s| ChatMessage { role: "system", content: s })
            .into_iter()
            .chain(std::iter::once(ChatMessage { role: "user", content }))
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        debug!(model = %self.model, prompt_chars = content.len(), "chat completion request");
        trace!(prompt = %content, "chat completion prompt");

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::Request(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = describe_error(status, &text);
            warn!(%status, model = %self.model, "chat completion rejected: {message}");
            return Err(ProviderError::Request(message));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(format!("unreadable chat completion: {e}")))?;
        into_response(reply)
    }
}

fn into_response(reply: ChatReply) -> Result<LlmResponse, ProviderError> {
    let usage = reply.usage.map(|u| LlmUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });
    let text = reply
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ProviderError::Request("chat completion had no content".into()));
    }
    Ok(LlmResponse { text, usage })
}

/// `HTTP <status>: <message>` using the `{"error": {...}}` envelope when the
/// body has one.
fn describe_error(status: StatusCode, body: &str) -> String {
    let envelope = serde_json::from_str::<Value>(body).ok();
    let error = envelope.as_ref().and_then(|v| v.get("error"));
    match error.and_then(|e| e.get("message")).and_then(Value::as_str) {
        Some(message) => match error.and_then(|e| e.get("code")) {
            Some(Value::String(code)) => format!("HTTP {status} ({code}): {message}"),
            Some(code) if !code.is_null() => format!("HTTP {status} ({code}): {message}"),
            _ => format!("HTTP {status}: {message}"),
        },
        None => format!("HTTP {status}: {}", body.trim()),
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str) -> OpenAiConfig {
        OpenAiConfig {
            api_base_url: "http://localhost:0/v1/chat/completions".into(),
            model: model.into(),
            temperature: 0.3,
            timeout_seconds: 1,
        }
    }

    #[test]
    fn reply_text_is_trimmed_and_usage_kept() {
        let reply: ChatReply = serde_json::from_str(
            r#"{
                "choices": [{"message": {"content": "  apollo \n"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }"#,
        )
        .unwrap();
        let resp = into_response(reply).unwrap();
        assert_eq!(resp.text, "apollo");
        assert_eq!(
            resp.usage,
            Some(LlmUsage {
                input_tokens: 12,
                output_tokens: 3
            })
        );
    }

    #[test]
    fn blank_reply_is_an_error() {
        let reply: ChatReply =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "   "}}]}"#).unwrap();
        assert!(into_response(reply).is_err());
        let reply: ChatReply = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(into_response(reply).is_err());
    }

    #[test]
    fn error_body_is_summarised() {
        let body = r#"{"error": {"message": "quota exceeded", "code": "insufficient_quota"}}"#;
        assert_eq!(
            describe_error(StatusCode::TOO_MANY_REQUESTS, body),
            "HTTP 429 Too Many Requests (insufficient_quota): quota exceeded"
        );
        assert_eq!(
            describe_error(StatusCode::BAD_GATEWAY, "upstream down\n"),
            "HTTP 502 Bad Gateway: upstream down"
        );
    }

    #[test]
    fn gpt5_models_omit_temperature() {
        let p = OpenAiCompatibleProvider::new(&config("gpt-5-mini"), None).unwrap();
        assert_eq!(p.temperature, None);
        let p = OpenAiCompatibleProvider::new(&config("gpt-4o-mini"), None).unwrap();
        assert_eq!(p.temperature, Some(0.3));
    }

    #[test]
    fn request_serialises_system_first() {
        let body = ChatRequest {
            model: "m",
            messages: vec![
                ChatMessage { role: "system", content: "be brief" },
                ChatMessage { role: "user", content: "hi" },
            ],
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json.get("temperature").is_none());
    }
}
