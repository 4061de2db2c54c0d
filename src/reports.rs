//! Living project reports built from the Slack archive.
//!
//! Every `slack_data/{channel}.json` archive feeds one report. New messages
//! since the tracker's `last_ts` are folded in batch by batch: the LLM sees
//! the report so far plus a batch and returns a section that is appended.

use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::ProviderError;
use crate::prompts::Template;
use crate::services::Services;
use crate::sources::slack::SlackMessage;
use crate::storage::{Storage, StorageError};
use crate::trackers::{ReportEntry, ReportTracker, parse_ts};

const DATA_PREFIX: &str = "slack_data/";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] ProviderError),
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRun {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

pub fn default_report_path(channel: &str) -> String {
    format!("slack_project_reports/{channel}.txt")
}

pub fn initial_report(channel: &str) -> String {
    format!("This is the project progress report for {channel}: ")
}

/// Render a Slack ts in local time, `YYYY-mm-dd HH:MM:SS`.
pub fn format_ts(ts: &str) -> String {
    let secs = parse_ts(ts);
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    match DateTime::from_timestamp(whole, nanos) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => ts.to_string(),
    }
}

fn message_block(batch: &[SlackMessage]) -> String {
    batch
        .iter()
        .map(|m| format!("{} - {}", format_ts(&m.ts), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Messages strictly newer than `last_ts`.
fn new_since(messages: Vec<SlackMessage>, last_ts: f64) -> Vec<SlackMessage> {
    messages
        .into_iter()
        .filter(|m| parse_ts(&m.ts) > last_ts)
        .collect()
}

/// Fold `messages` into `report`, one LLM call per batch.
pub async fn extend_report(
    services: &Services,
    report: String,
    messages: &[SlackMessage],
) -> Result<String, ReportError> {
    let cfg = &services.config.reports;
    let mut report = report;
    let mut done = 0usize;
    for (i, batch) in messages.chunks(cfg.batch_size.max(1)).enumerate() {
        if i > 0 && cfg.delay_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(cfg.delay_seconds)).await;
        }
        let prompt = services
            .prompts()
            .template(Template::ReportUpdate)
            .var("previous_report", report.as_str())
            .var("messages", message_block(batch))
            .build();
        let section = services.ask_llm(&prompt).await?;
        report.push_str(&format!("\n\n {section}"));
        done += batch.len();
        debug!(processed = done, total = messages.len(), "report batch folded");
    }
    Ok(report)
}

/// Update one channel's report. Returns `false` when there was nothing new.
async fn process_channel(
    services: &Services,
    tracker: &mut ReportTracker,
    channel: &str,
    messages: Vec<SlackMessage>,
) -> Result<bool, ReportError> {
    let storage = &services.storage;
    let (report_path, last_ts, previous) = match tracker.get(channel) {
        Some(entry) => {
            let previous = match storage.load_text(&entry.report_path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(channel, error = %e, "could not load previous report");
                    initial_report(channel)
                }
            };
            (entry.report_path.clone(), parse_ts(&entry.last_ts), previous)
        }
        None => (default_report_path(channel), 0.0, initial_report(channel)),
    };

    let fresh = new_since(messages, last_ts);
    if fresh.is_empty() {
        debug!(channel, "no new messages");
        return Ok(false);
    }
    let newest = fresh
        .iter()
        .max_by(|a, b| parse_ts(&a.ts).total_cmp(&parse_ts(&b.ts)))
        .map(|m| m.ts.clone())
        .unwrap_or_default();

    let updated = extend_report(services, previous, &fresh).await?;
    storage.save_text(&report_path, &updated).await?;
    tracker.set(
        channel,
        ReportEntry {
            report_path,
            last_ts: newest,
        },
    );
    info!(channel, messages = fresh.len(), "report updated");
    Ok(true)
}

/// Channel names with an archive under `slack_data/`.
async fn archived_channels(storage: &Storage) -> Result<Vec<String>, StorageError> {
    Ok(storage
        .list(DATA_PREFIX)
        .await?
        .into_iter()
        .filter_map(|path| {
            path.strip_prefix(DATA_PREFIX)
                .and_then(|name| name.strip_suffix(".json"))
                .filter(|name| !name.contains('/'))
                .map(str::to_string)
        })
        .collect())
}

/// Refresh every report. One channel failing does not stop the rest; the
/// tracker is saved once at the end.
pub async fn run_all(services: &Services) -> Result<ReportRun, ReportError> {
    let storage = &services.storage;
    let mut tracker = ReportTracker::load(storage).await;
    let mut run = ReportRun::default();

    for channel in archived_channels(storage).await? {
        let path = format!("{DATA_PREFIX}{channel}.json");
        let outcome = match storage.load_json::<Vec<SlackMessage>>(&path).await {
            Ok(messages) => process_channel(services, &mut tracker, &channel, messages).await,
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(true) => run.updated.push(channel),
            Ok(false) => run.unchanged.push(channel),
            Err(e) => {
                warn!(channel = %channel, error = %e, "report update failed");
                run.failed.push(channel);
            }
        }
    }

    tracker.save(storage).await?;
    info!(
        updated = run.updated.len(),
        unchanged = run.unchanged.len(),
        failed = run.failed.len(),
        "reports processed"
    );
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::trackers::REPORT_TRACKER_PATH;
    use tempfile::TempDir;

    fn msg(ts: &str, text: &str) -> SlackMessage {
        serde_json::from_value(serde_json::json!({"ts": ts, "text": text})).unwrap()
    }

    fn services(dir: &TempDir, replies: &[&str]) -> (Services, ScriptedProvider) {
        let scripted = ScriptedProvider::new(replies.iter().map(|s| s.to_string()).collect());
        let services = Services::for_tests(dir.path(), LlmProvider::Scripted(scripted.clone()));
        (services, scripted)
    }

    #[test]
    fn format_ts_shape() {
        let s = format_ts("1712345678.000200");
        assert_eq!(s.len(), 19);
        assert_eq!(&s[4..5], "-");
        assert_eq!(&s[13..14], ":");
    }

    #[test]
    fn filter_is_strictly_newer() {
        let msgs = vec![msg("10.0", "old"), msg("10.5", "new")];
        let fresh = new_since(msgs, 10.0);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].text, "new");
    }

    #[tokio::test]
    async fn batches_append_sections() {
        let dir = TempDir::new().unwrap();
        let (mut services, scripted) = services(&dir, &["first", "second"]);
        let config = std::sync::Arc::make_mut(&mut services.config);
        config.reports.batch_size = 2;

        let msgs = vec![msg("1.0", "a"), msg("2.0", "b"), msg("3.0", "c")];
        let report = extend_report(&services, "HEAD".into(), &msgs).await.unwrap();
        assert_eq!(report, "HEAD\n\n first\n\n second");

        let prompts = scripted.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains(" - a\n"));
        assert!(prompts[1].contains("HEAD\n\n first"));
        assert!(prompts[1].contains(" - c"));
    }

    #[tokio::test]
    async fn run_all_creates_report_and_tracker() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(&dir, &["- launch moved"]);
        let storage = &services.storage;
        storage
            .save_json(
                "slack_data/apollo.json",
                &vec![msg("100.0", "launch moved"), msg("50.5", "kickoff")],
            )
            .await
            .unwrap();

        let run = run_all(&services).await.unwrap();
        assert_eq!(run.updated, vec!["apollo"]);

        let report = storage
            .load_text(&default_report_path("apollo"))
            .await
            .unwrap();
        assert!(report.starts_with("This is the project progress report for apollo: "));
        assert!(report.ends_with("\n\n - launch moved"));

        let tracker = ReportTracker::load(storage).await;
        let entry = tracker.get("apollo").unwrap();
        assert_eq!(entry.last_ts, "100.0");
        assert!(storage.exists(REPORT_TRACKER_PATH).await.unwrap());

        let again = run_all(&services).await.unwrap();
        assert_eq!(again.unchanged, vec!["apollo"]);
    }

    #[tokio::test]
    async fn broken_archive_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(&dir, &["ok"]);
        let storage = &services.storage;
        storage.save_text("slack_data/broken.json", "{{{").await.unwrap();
        storage
            .save_json("slack_data/zephyr.json", &vec![msg("5.0", "hello")])
            .await
            .unwrap();

        let run = run_all(&services).await.unwrap();
        assert_eq!(run.failed, vec!["broken"]);
        assert_eq!(run.updated, vec!["zephyr"]);
    }
}
