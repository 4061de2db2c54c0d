//! Gmail ingestion.
//!
//! Lists the newest messages, skips ids already processed, asks the LLM to
//! pull the useful content out of each plain-text body and stores the
//! result as chunks in the configured vector store.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::google_auth::GoogleAuth;
use super::{SourceError, SyncStats, check_response, http_client, store_documents};
use crate::chunking::chunk_documents;
use crate::prompts::Template;
use crate::services::Services;
use crate::trackers::{PROCESSED_EMAILS_PATH, ProcessedIds};

const SERVICE: &str = "gmail";
const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const TIMEOUT_SECS: u64 = 30;

/// Gmail bodies are URL-safe base64, padded or not depending on the part.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The parts of a message the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
}

// ── Message parsing ─────────────────────────────────────────────────────────

pub fn header_value(headers: &[Value], key: &str) -> String {
    for item in headers {
        let name = item.get("name").and_then(Value::as_str).unwrap_or("");
        if name.eq_ignore_ascii_case(key) {
            return item
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
        }
    }
    String::new()
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = BODY_ENGINE.decode(data.trim()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Concatenate every `text/plain` part, walking nested multiparts in order.
pub fn plain_text_body(payload: &Value) -> String {
    let mut out = String::new();
    collect_plain(payload, &mut out);
    out
}

fn collect_plain(part: &Value, out: &mut String) {
    if let Some(parts) = part.get("parts").and_then(Value::as_array) {
        for p in parts {
            collect_plain(p, out);
        }
        return;
    }
    let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or("");
    if mime != "text/plain" {
        return;
    }
    let data = part
        .get("body")
        .and_then(|b| b.get("data"))
        .and_then(Value::as_str);
    match data.map(decode_body) {
        Some(Some(text)) => out.push_str(&text),
        Some(None) => debug!("undecodable text/plain part skipped"),
        None => {}
    }
}

/// Build an [`Email`] from a `format=full` message resource.
pub fn parse_message(msg: &Value) -> Email {
    let payload = msg.get("payload").cloned().unwrap_or(Value::Null);
    let headers = payload
        .get("headers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Email {
        id: msg.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
        subject: header_value(&headers, "Subject"),
        sender: header_value(&headers, "From"),
        body: plain_text_body(&payload),
    }
}

// ── API client ──────────────────────────────────────────────────────────────

struct GmailClient {
    http: reqwest::Client,
    token: String,
}

impl GmailClient {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::http(SERVICE, e))?;
        check_response(SERVICE, resp)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::http(SERVICE, format!("bad response: {e}")))
    }

    async fn list_ids(&self, max_results: u32) -> Result<Vec<String>, SourceError> {
        let json = self
            .get_json(
                &format!("{GMAIL_BASE}/messages"),
                &[("maxResults", max_results.to_string())],
            )
            .await?;
        Ok(json
            .get("messages")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_full(&self, id: &str) -> Result<Email, SourceError> {
        let msg = self
            .get_json(
                &format!("{GMAIL_BASE}/messages/{id}"),
                &[("format", "full".to_string())],
            )
            .await?;
        Ok(parse_message(&msg))
    }
}

// ── Ingestion ───────────────────────────────────────────────────────────────

/// Extract, chunk and store one email. Returns the number of chunks written.
pub async fn ingest_email(services: &Services, email: &Email) -> Result<usize, SourceError> {
    let prompt = services
        .prompts()
        .template(Template::EmailExtract)
        .var("email_body", email.body.as_str())
        .build();
    let extracted = services.ask_llm(&prompt).await?;
    if extracted.is_empty() {
        return Ok(0);
    }

    let cfg = &services.config.ingest.gmail;
    let mut meta = Map::new();
    meta.insert("source".into(), Value::from("gmail"));
    meta.insert("subject".into(), Value::from(email.subject.as_str()));
    meta.insert("sender".into(), Value::from(email.sender.as_str()));
    let docs = chunk_documents(&extracted, &meta, &email.id, cfg.chunk, None)
        .map_err(|e| SourceError::Chunk(e.to_string()))?;
    store_documents(services, &cfg.store, &docs).await
}

pub async fn sync(services: &Services) -> Result<SyncStats, SourceError> {
    let http = http_client(TIMEOUT_SECS)?;
    let auth = GoogleAuth::from_config(&services.config, http.clone())?;
    let client = GmailClient {
        token: auth.access_token().await?,
        http,
    };
    let storage = &services.storage;
    let mut processed = ProcessedIds::load(storage, PROCESSED_EMAILS_PATH).await;
    let mut stats = SyncStats::default();

    for id in client.list_ids(services.config.ingest.gmail.max_results).await? {
        stats.seen += 1;
        if processed.contains(&id) {
            debug!(id = %id, "email already processed");
            stats.skipped += 1;
            continue;
        }
        let email = match client.get_full(&id).await {
            Ok(e) => e,
            Err(e) => {
                warn!(id = %id, error = %e, "failed fetching email");
                stats.failed += 1;
                continue;
            }
        };
        if email.body.trim().is_empty() {
            debug!(id = %id, "email has no plain-text body");
            stats.skipped += 1;
            processed.mark(storage, &id).await?;
            continue;
        }
        info!(subject = %email.subject, sender = %email.sender, "ingesting email");
        match ingest_email(services, &email).await {
            Ok(written) => {
                stats.written += written;
                processed.mark(storage, &id).await?;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "email ingestion failed");
                stats.failed += 1;
            }
        }
    }

    info!(%stats, "gmail sync finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;
    use crate::llm::providers::scripted::ScriptedProvider;
    use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![
            json!({"name": "subject", "value": "Launch"}),
            json!({"name": "From", "value": "Ana <ana@example.com>"}),
        ];
        assert_eq!(header_value(&headers, "Subject"), "Launch");
        assert_eq!(header_value(&headers, "from"), "Ana <ana@example.com>");
        assert_eq!(header_value(&headers, "Date"), "");
    }

    #[test]
    fn decodes_padded_and_unpadded_bodies() {
        let text = "Hello? yes>";
        assert_eq!(decode_body(&URL_SAFE.encode(text)).as_deref(), Some(text));
        assert_eq!(decode_body(&URL_SAFE_NO_PAD.encode(text)).as_deref(), Some(text));
        assert_eq!(decode_body("***"), None);
    }

    #[test]
    fn plain_parts_are_collected_from_nested_multiparts() {
        let msg = json!({
            "id": "m1",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "Subject", "value": "Status"},
                    {"name": "From", "value": "ops@example.com"}
                ],
                "parts": [
                    {"mimeType": "multipart/alternative", "parts": [
                        {"mimeType": "text/plain", "body": {"data": URL_SAFE_NO_PAD.encode("part one. ")}},
                        {"mimeType": "text/html", "body": {"data": URL_SAFE_NO_PAD.encode("<b>no</b>")}}
                    ]},
                    {"mimeType": "text/plain", "body": {"data": URL_SAFE.encode("part two")}}
                ]
            }
        });
        let email = parse_message(&msg);
        assert_eq!(email.id, "m1");
        assert_eq!(email.subject, "Status");
        assert_eq!(email.sender, "ops@example.com");
        assert_eq!(email.body, "part one. part two");
    }

    #[test]
    fn single_part_message_body() {
        let msg = json!({
            "id": "m2",
            "payload": {"mimeType": "text/plain", "headers": [], "body": {"data": URL_SAFE.encode("just text")}}
        });
        assert_eq!(parse_message(&msg).body, "just text");
    }

    #[tokio::test]
    async fn ingest_email_stores_extracted_chunks() {
        let dir = TempDir::new().unwrap();
        let scripted = ScriptedProvider::new(vec!["Apollo ships on March 3.".into()]);
        let services = Services::for_tests(dir.path(), LlmProvider::Scripted(scripted.clone()));
        let email = Email {
            id: "m9".into(),
            subject: "Apollo".into(),
            sender: "pm@example.com".into(),
            body: "raw body".into(),
        };
        let written = ingest_email(&services, &email).await.unwrap();
        assert_eq!(written, 1);
        assert!(scripted.prompts()[0].contains("raw body"));

        let store = services.store(&services.config.ingest.gmail.store).unwrap();
        let emb = services.embedder.embed("Apollo ships").await.unwrap();
        let hits = store.query(&emb, 5).await.unwrap();
        let doc = &hits[0].document;
        assert_eq!(doc.meta_str("source"), Some("gmail"));
        assert_eq!(doc.meta_str("sender"), Some("pm@example.com"));
        assert_eq!(doc.meta_str("chunk_id"), Some("m9_chunk_0"));
    }
}
