//! Slack channel archiver.
//!
//! Pulls new messages (and their thread replies) for every channel in the
//! channel tracker and appends them to `slack_data/{channel_name}.json`.
//! The report builder reads those files later.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{SourceError, SyncStats, check_response, http_client};
use crate::core::config::SlackConfig;
use crate::services::Services;
use crate::storage::{Storage, StorageError};
use crate::trackers::{ChannelTracker, parse_ts};

const SERVICE: &str = "slack";
const REPLIES_LIMIT: u32 = 100;
const TIMEOUT_SECS: u64 = 30;

/// One archived message. Top-level messages carry `is_thread_parent`,
/// replies carry `is_thread_reply` and the parent's ts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_thread_parent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_thread_reply: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ts: Option<String>,
}

impl SlackMessage {
    fn parent(ts: String, text: String) -> Self {
        Self {
            ts,
            text,
            is_thread_parent: Some(true),
            is_thread_reply: None,
            parent_ts: None,
        }
    }

    fn reply(ts: String, text: String, parent_ts: &str) -> Self {
        Self {
            ts,
            text,
            is_thread_parent: None,
            is_thread_reply: Some(true),
            parent_ts: Some(parent_ts.to_string()),
        }
    }
}

pub fn data_path(channel_name: &str) -> String {
    format!("slack_data/{channel_name}.json")
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireMessage {
    ts: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    reply_count: u32,
    thread_ts: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

impl ConversationsResponse {
    fn into_result(self) -> Result<Self, SourceError> {
        if self.ok {
            Ok(self)
        } else {
            Err(SourceError::api(
                SERVICE,
                self.error.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }

    fn next_cursor(&self) -> Option<String> {
        self.response_metadata
            .as_ref()
            .map(|m| m.next_cursor.clone())
            .filter(|c| !c.is_empty())
    }
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    config: SlackConfig,
}

impl SlackClient {
    pub fn new(config: SlackConfig, token: String) -> Result<Self, SourceError> {
        Ok(Self {
            http: http_client(TIMEOUT_SECS)?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token,
            config,
        })
    }

    async fn call(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<ConversationsResponse, SourceError> {
        let url = format!("{}/{method}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::http(SERVICE, e))?;
        let resp = check_response(SERVICE, resp).await?;
        resp.json::<ConversationsResponse>()
            .await
            .map_err(|e| SourceError::http(SERVICE, format!("bad response: {e}")))?
            .into_result()
    }

    /// Fetch every message newer than `oldest`, with thread replies, sorted
    /// by ts. Also returns the newest top-level ts seen, or `oldest` when
    /// nothing new arrived.
    pub async fn fetch_since(
        &self,
        channel_id: &str,
        oldest: &str,
    ) -> Result<(Vec<SlackMessage>, String), SourceError> {
        let mut all = Vec::new();
        let mut max_ts = oldest.to_string();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("channel", channel_id.to_string()),
                ("oldest", oldest.to_string()),
                ("limit", self.config.page_limit.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let page = self.call("conversations.history", &query).await?;
            debug!(channel = channel_id, count = page.messages.len(), "history page");
            cursor = page.next_cursor();

            for msg in page.messages {
                let Some(ts) = msg.ts else { continue };
                if parse_ts(&ts) > parse_ts(&max_ts) {
                    max_ts = ts.clone();
                }
                let has_thread = msg.reply_count > 0 && msg.thread_ts.is_some();
                all.push(SlackMessage::parent(ts.clone(), msg.text));

                if has_thread {
                    pause(self.config.thread_delay_seconds).await;
                    match self.replies(channel_id, &ts).await {
                        Ok(replies) => all.extend(replies),
                        Err(e) => warn!(channel = channel_id, ts = %ts, error = %e, "thread replies failed"),
                    }
                }
            }

            if cursor.is_none() {
                break;
            }
            pause(self.config.page_delay_seconds).await;
        }

        sort_by_ts(&mut all);
        Ok((all, max_ts))
    }

    async fn replies(&self, channel_id: &str, parent_ts: &str) -> Result<Vec<SlackMessage>, SourceError> {
        let query = [
            ("channel", channel_id.to_string()),
            ("ts", parent_ts.to_string()),
            ("limit", REPLIES_LIMIT.to_string()),
        ];
        let resp = self.call("conversations.replies", &query).await?;
        Ok(replies_from(resp.messages, parent_ts))
    }
}

/// The first entry of a replies page is the parent itself.
fn replies_from(messages: Vec<WireMessage>, parent_ts: &str) -> Vec<SlackMessage> {
    messages
        .into_iter()
        .skip(1)
        .filter_map(|m| m.ts.map(|ts| SlackMessage::reply(ts, m.text, parent_ts)))
        .collect()
}

fn sort_by_ts(messages: &mut [SlackMessage]) {
    messages.sort_by(|a, b| parse_ts(&a.ts).total_cmp(&parse_ts(&b.ts)));
}

async fn pause(secs: u64) {
    if secs > 0 {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}

/// Append `new` to the channel archive. An unreadable archive starts over.
pub async fn append_messages(
    storage: &Storage,
    channel_name: &str,
    new: Vec<SlackMessage>,
) -> Result<usize, SourceError> {
    let path = data_path(channel_name);
    let mut existing: Vec<SlackMessage> = match storage.load_json(&path).await {
        Ok(v) => v,
        Err(StorageError::NotFound(_)) => Vec::new(),
        Err(e) => {
            warn!(channel = channel_name, error = %e, "could not load archive, starting fresh");
            Vec::new()
        }
    };
    existing.extend(new);
    storage.save_json(&path, &existing).await?;
    Ok(existing.len())
}

// ── Sync ────────────────────────────────────────────────────────────────────

/// Sync every tracked channel. A failing channel is logged and skipped.
pub async fn sync_all(services: &Services) -> Result<SyncStats, SourceError> {
    let token = services
        .config
        .secrets
        .slack_bot_token
        .clone()
        .ok_or_else(|| SourceError::MissingCredential("SLACK_BOT_TOKEN".into()))?;
    let client = SlackClient::new(services.config.ingest.slack.clone(), token)?;
    let storage = &services.storage;

    let mut tracker = ChannelTracker::load(storage).await;
    let ids: Vec<String> = tracker.channels.keys().cloned().collect();
    let mut stats = SyncStats::default();

    for (i, channel_id) in ids.iter().enumerate() {
        if i > 0 {
            pause(services.config.ingest.slack.channel_delay_seconds).await;
        }
        match sync_channel(&client, storage, &mut tracker, channel_id).await {
            Ok(count) => {
                stats.seen += 1;
                stats.written += count;
            }
            Err(e) => {
                stats.failed += 1;
                warn!(channel = %channel_id, error = %e, "slack channel sync failed");
            }
        }
    }

    info!(%stats, "slack sync finished");
    Ok(stats)
}

async fn sync_channel(
    client: &SlackClient,
    storage: &Storage,
    tracker: &mut ChannelTracker,
    channel_id: &str,
) -> Result<usize, SourceError> {
    let last_ts = tracker.last_ts(channel_id).to_string();
    let name = tracker
        .channels
        .get(channel_id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| channel_id.to_string());
    info!(channel = %name, since = %last_ts, "syncing slack channel");

    let (messages, max_ts) = client.fetch_since(channel_id, &last_ts).await?;
    let fetched = messages.len();
    if fetched > 0 {
        let total = append_messages(storage, &name, messages).await?;
        debug!(channel = %name, fetched, total, "archive updated");
    }
    tracker.update_last_ts(channel_id, &max_ts)?;
    tracker.save(storage).await?;
    Ok(fetched)
}
