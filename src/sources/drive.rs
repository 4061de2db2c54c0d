//! Google Drive ingestion, plus the Drive client the meetings source shares.
//!
//! Ingested formats: plain text (`.txt`, `.md`), PDF, Word (`.docx`) and
//! native Google Docs (exported as text). Anything else is skipped with a
//! log line.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::google_auth::GoogleAuth;
use super::{SourceError, SyncStats, check_response, extract, http_client, store_documents};
use crate::chunking::chunk_documents;
use crate::services::Services;
use crate::trackers::{PROCESSED_DRIVE_PATH, ProcessedIds};

const SERVICE: &str = "drive";
const DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3";
const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";
const PDF_MIME: &str = "application/pdf";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const TIMEOUT_SECS: u64 = 60;

/// How the text of a Drive file is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    GoogleDoc,
    PlainText,
    Pdf,
    Docx,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

impl DriveFile {
    /// Classify by MIME type, falling back to the file extension.
    pub fn kind(&self) -> Option<FileKind> {
        let lower = self.name.to_ascii_lowercase();
        match self.mime_type.as_str() {
            GOOGLE_DOC_MIME => Some(FileKind::GoogleDoc),
            PDF_MIME => Some(FileKind::Pdf),
            DOCX_MIME => Some(FileKind::Docx),
            _ if lower.ends_with(".pdf") => Some(FileKind::Pdf),
            _ if lower.ends_with(".docx") => Some(FileKind::Docx),
            _ if lower.ends_with(".txt") || lower.ends_with(".md") => Some(FileKind::PlainText),
            _ => None,
        }
    }

    /// Whether the text of this file can be extracted.
    pub fn is_supported(&self) -> bool {
        self.kind().is_some()
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// `q` expression restricting a listing to one folder.
fn folder_query(folder_id: &str) -> String {
    format!("'{}' in parents", folder_id.replace('\'', "\\'"))
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct DriveClient {
    http: reqwest::Client,
    token: String,
}

impl DriveClient {
    /// Authorize through the shared Google OAuth flow.
    pub async fn connect(services: &Services) -> Result<Self, SourceError> {
        let http = http_client(TIMEOUT_SECS)?;
        let auth = GoogleAuth::from_config(&services.config, http.clone())?;
        Ok(Self {
            token: auth.access_token().await?,
            http,
        })
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, SourceError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::http(SERVICE, e))?;
        check_response(SERVICE, resp).await
    }

    /// One page of files, optionally limited to a folder.
    pub async fn list_files(
        &self,
        page_size: u32,
        folder_id: Option<&str>,
    ) -> Result<Vec<DriveFile>, SourceError> {
        let mut query = vec![
            ("pageSize", page_size.to_string()),
            ("fields", "files(id, name, mimeType)".to_string()),
        ];
        if let Some(folder) = folder_id {
            query.push(("q", folder_query(folder)));
        }
        let list: FileList = self
            .get(&format!("{DRIVE_BASE}/files"), &query)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::http(SERVICE, format!("bad file list: {e}")))?;
        Ok(list.files)
    }

    /// Download a supported file and extract its text.
    pub async fn download_text(&self, file: &DriveFile) -> Result<String, SourceError> {
        let kind = file.kind().ok_or_else(|| {
            SourceError::Extract(format!("unsupported file type: {}", file.mime_type))
        })?;
        let resp = match kind {
            FileKind::GoogleDoc => {
                self.get(
                    &format!("{DRIVE_BASE}/files/{}/export", file.id),
                    &[("mimeType", "text/plain".to_string())],
                )
                .await?
            }
            _ => {
                self.get(
                    &format!("{DRIVE_BASE}/files/{}", file.id),
                    &[("alt", "media".to_string())],
                )
                .await?
            }
        };
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SourceError::http(SERVICE, e))?;
        file_text(kind, bytes.to_vec()).await
    }
}

/// Turn downloaded bytes into text according to `kind`.
pub async fn file_text(kind: FileKind, bytes: Vec<u8>) -> Result<String, SourceError> {
    match kind {
        FileKind::Pdf => extract::pdf_text(bytes).await,
        FileKind::Docx => extract::docx_text(bytes).await,
        FileKind::GoogleDoc | FileKind::PlainText => {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

// ── Ingestion ───────────────────────────────────────────────────────────────

/// Chunk and store the text of one Drive file.
pub async fn ingest_file(
    services: &Services,
    file: &DriveFile,
    text: &str,
) -> Result<usize, SourceError> {
    let cfg = &services.config.ingest.drive;
    let mut meta = Map::new();
    meta.insert("source".into(), Value::from("google_drive"));
    meta.insert("file_name".into(), Value::from(file.name.as_str()));
    meta.insert("file_id".into(), Value::from(file.id.as_str()));
    let docs = chunk_documents(text, &meta, &file.id, cfg.chunk, None)
        .map_err(|e| SourceError::Chunk(e.to_string()))?;
    store_documents(services, &cfg.store, &docs).await
}

pub async fn sync(services: &Services) -> Result<SyncStats, SourceError> {
    let cfg = &services.config.ingest.drive;
    let client = DriveClient::connect(services).await?;
    let storage = &services.storage;
    let mut processed = ProcessedIds::load(storage, PROCESSED_DRIVE_PATH).await;
    let mut stats = SyncStats::default();

    for file in client.list_files(cfg.page_size, cfg.folder_id.as_deref()).await? {
        stats.seen += 1;
        if processed.contains(&file.id) {
            debug!(file = %file.name, "drive file already processed");
            stats.skipped += 1;
            continue;
        }
        if !file.is_supported() {
            info!(file = %file.name, mime = %file.mime_type, "unsupported drive file, skipping");
            stats.skipped += 1;
            continue;
        }

        let text = match client.download_text(&file).await {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %file.name, error = %e, "drive download failed");
                stats.failed += 1;
                continue;
            }
        };
        if text.trim().is_empty() {
            debug!(file = %file.name, "empty drive file");
            stats.skipped += 1;
            continue;
        }

        match ingest_file(services, &file, &text).await {
            Ok(written) => {
                info!(file = %file.name, chunks = written, "drive file stored");
                stats.written += written;
                processed.mark(storage, &file.id).await?;
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "drive ingestion failed");
                stats.failed += 1;
            }
        }
    }

    info!(%stats, "drive sync finished");
    Ok(stats)
}
