//! Meeting summaries from a Drive folder.
//!
//! Each new file is attributed to a project by the classifier, cleaned up by
//! the LLM and stored as chunks that each open with a line naming the
//! project, so retrieval hits carry their attribution in the text itself.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::drive::{DriveClient, DriveFile};
use super::{SourceError, SyncStats, store_documents};
use crate::assistant::match_project;
use crate::chunking::chunk_documents;
use crate::prompts::{Template, bullet_list};
use crate::services::Services;
use crate::trackers::{PROCESSED_MEETINGS_PATH, ProcessedIds, ReportTracker};

pub fn title_line(project: &str) -> String {
    format!("[This is the meeting summary for {project} project.]")
}

/// First `n` characters, never splitting a code point.
fn leading_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Ask the classifier which known project `text` belongs to.
pub async fn detect_meeting_project(
    services: &Services,
    text: &str,
    projects: &[String],
) -> Result<String, SourceError> {
    let prompt = services
        .prompts()
        .template(Template::DetectMeetingProject)
        .var("text", text)
        .var("projects", bullet_list(projects))
        .build();
    let reply = services.ask_llm(&prompt).await?;
    Ok(match_project(&reply, projects))
}

/// Classify, clean, chunk and store one meeting summary.
pub async fn ingest_meeting(
    services: &Services,
    file: &DriveFile,
    raw_text: &str,
    projects: &[String],
) -> Result<usize, SourceError> {
    let cfg = &services.config.ingest.meetings;
    let head = leading_chars(raw_text, cfg.detect_chars);
    let project = detect_meeting_project(services, head, projects).await?;
    debug!(file = %file.name, project = %project, "meeting project detected");

    let prompt = services
        .prompts()
        .template(Template::MeetingClean)
        .var("raw_text", raw_text)
        .build();
    let cleaned = services.ask_llm(&prompt).await?;
    if cleaned.is_empty() {
        return Ok(0);
    }

    let mut meta = Map::new();
    meta.insert("source".into(), Value::from("grain"));
    meta.insert("project_name".into(), Value::from(project.as_str()));
    meta.insert("file_name".into(), Value::from(file.name.as_str()));
    let title = title_line(&project);
    let docs = chunk_documents(&cleaned, &meta, &file.id, cfg.chunk, Some(&title))
        .map_err(|e| SourceError::Chunk(e.to_string()))?;
    store_documents(services, &cfg.store, &docs).await
}

pub async fn sync(services: &Services) -> Result<SyncStats, SourceError> {
    let cfg = &services.config.ingest.meetings;
    let folder = cfg
        .folder_id
        .as_deref()
        .ok_or_else(|| SourceError::NotConfigured("ingest.meetings.folder_id".into()))?;
    let client = DriveClient::connect(services).await?;
    let storage = &services.storage;
    let projects = ReportTracker::load(storage).await.project_names();
    let mut processed = ProcessedIds::load(storage, PROCESSED_MEETINGS_PATH).await;
    let mut stats = SyncStats::default();

    let files = client.list_files(cfg.page_size, Some(folder)).await?;
    info!(count = files.len(), "meeting files listed");

    for file in files {
        stats.seen += 1;
        if processed.contains(&file.id) {
            stats.skipped += 1;
            continue;
        }
        if !file.is_supported() {
            info!(file = %file.name, mime = %file.mime_type, "unsupported meeting file, skipping");
            stats.skipped += 1;
            continue;
        }
        let raw = match client.download_text(&file).await {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %file.name, error = %e, "meeting download failed");
                stats.failed += 1;
                continue;
            }
        };
        if raw.trim().is_empty() {
            debug!(file = %file.name, "empty meeting file");
            stats.skipped += 1;
            continue;
        }

        match ingest_meeting(services, &file, &raw, &projects).await {
            Ok(written) => {
                info!(file = %file.name, chunks = written, "meeting stored");
                stats.written += written;
                processed.mark(storage, &file.id).await?;
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "meeting ingestion failed");
                stats.failed += 1;
            }
        }
    }

    info!(%stats, "meetings sync finished");
    Ok(stats)
}
