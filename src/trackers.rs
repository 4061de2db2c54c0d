//! Persistent bookkeeping kept in [`Storage`].
//!
//! All trackers are small JSON documents. A missing or unparsable file loads
//! as empty (with a warning) so a fresh deployment starts cleanly.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{Storage, StorageError};

pub const REPORT_TRACKER_PATH: &str = "slack_project_reports/report_tracker.json";
pub const CHANNEL_TRACKER_PATH: &str = "slack_channel_tracker.json";
pub const CLICKUP_MAP_PATH: &str = "config/tracker_to_clickup_map.json";
pub const CLICKUP_PROJECTS_PATH: &str = "clickup_data/clickup_projects.json";
pub const PROCESSED_EMAILS_PATH: &str = "config/processed_emails.json";
pub const PROCESSED_DRIVE_PATH: &str = "config/processed_gd_files.json";
pub const PROCESSED_MEETINGS_PATH: &str = "config/processed_meetings.json";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("channel {0} not found in tracker")]
    UnknownChannel(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Load `path` or fall back to `T::default()` when it is absent or broken.
async fn load_or_default<T: DeserializeOwned + Default>(storage: &Storage, path: &str) -> T {
    match storage.load_json::<T>(path).await {
        Ok(v) => v,
        Err(StorageError::NotFound(_)) => {
            debug!(path, "tracker not found, starting empty");
            T::default()
        }
        Err(e) => {
            warn!(path, error = %e, "could not load tracker, starting empty");
            T::default()
        }
    }
}

/// Slack timestamps are decimal strings (`"1712345678.000200"`). Older
/// files sometimes hold them as bare numbers; accept both.
fn ts_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ts {
        Str(String),
        Num(f64),
    }
    match Ts::deserialize(d) {
        Ok(Ts::Str(s)) => Ok(s),
        Ok(Ts::Num(n)) => Ok(n.to_string()),
        Err(_) => Err(de::Error::custom("last_ts must be a string or number")),
    }
}

/// Parse a Slack timestamp; anything unparsable counts as `0`.
pub fn parse_ts(ts: &str) -> f64 {
    ts.trim().parse::<f64>().unwrap_or(0.0)
}

// ── Report tracker ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub report_path: String,
    #[serde(deserialize_with = "ts_string")]
    pub last_ts: String,
}

/// Project (Slack channel name) → running report. The keys of this map are
/// the project names the assistant classifies queries against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportTracker {
    pub projects: BTreeMap<String, ReportEntry>,
}

impl ReportTracker {
    pub async fn load(storage: &Storage) -> Self {
        load_or_default(storage, REPORT_TRACKER_PATH).await
    }

    pub async fn save(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.save_json(REPORT_TRACKER_PATH, self).await
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    pub fn get(&self, project: &str) -> Option<&ReportEntry> {
        self.projects.get(project)
    }

    pub fn set(&mut self, project: &str, entry: ReportEntry) {
        self.projects.insert(project.to_string(), entry);
    }
}

// ── Channel tracker ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub project: String,
    #[serde(deserialize_with = "ts_string")]
    pub last_ts: String,
}

/// Slack channel id → sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTracker {
    pub channels: BTreeMap<String, ChannelEntry>,
}

impl ChannelTracker {
    pub async fn load(storage: &Storage) -> Self {
        load_or_default(storage, CHANNEL_TRACKER_PATH).await
    }

    pub async fn save(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.save_json(CHANNEL_TRACKER_PATH, self).await
    }

    /// Add a channel starting from `last_ts = "0"`. Returns `false` if the
    /// channel was already registered (the existing entry is kept).
    pub fn register(&mut self, channel_id: &str, name: &str, project: &str) -> bool {
        if self.channels.contains_key(channel_id) {
            return false;
        }
        self.channels.insert(
            channel_id.to_string(),
            ChannelEntry {
                name: name.to_string(),
                project: project.to_string(),
                last_ts: "0".to_string(),
            },
        );
        true
    }

    /// Last synced ts, `"0"` for unknown channels.
    pub fn last_ts(&self, channel_id: &str) -> &str {
        self.channels
            .get(channel_id)
            .map(|c| c.last_ts.as_str())
            .unwrap_or("0")
    }

    pub fn update_last_ts(&mut self, channel_id: &str, ts: &str) -> Result<(), TrackerError> {
        let entry = self
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| TrackerError::UnknownChannel(channel_id.to_string()))?;
        entry.last_ts = ts.to_string();
        Ok(())
    }
}

// ── Processed ids ───────────────────────────────────────────────────────────

/// Ids already ingested from one source, persisted as a JSON array.
#[derive(Debug, Clone)]
pub struct ProcessedIds {
    path: &'static str,
    ids: BTreeSet<String>,
}

impl ProcessedIds {
    pub async fn load(storage: &Storage, path: &'static str) -> Self {
        Self {
            path,
            ids: load_or_default(storage, path).await,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record `id` and persist immediately so a crash mid-run does not
    /// re-ingest finished items.
    pub async fn mark(&mut self, storage: &Storage, id: &str) -> Result<(), StorageError> {
        if self.ids.insert(id.to_string()) {
            storage.save_json(self.path, &self.ids).await?;
        }
        Ok(())
    }
}

// ── ClickUp data ────────────────────────────────────────────────────────────

/// Report-tracker project key → ClickUp project key.
pub async fn load_clickup_map(storage: &Storage) -> HashMap<String, String> {
    load_or_default(storage, CLICKUP_MAP_PATH).await
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickupTask {
    pub name: String,
    pub status: String,
    pub id: String,
}

/// ClickUp project name → tasks shared with the user under it.
pub type ClickupProjects = BTreeMap<String, Vec<ClickupTask>>;

pub async fn load_clickup_projects(storage: &Storage) -> ClickupProjects {
    load_or_default(storage, CLICKUP_PROJECTS_PATH).await
}

pub async fn save_clickup_projects(
    storage: &Storage,
    projects: &ClickupProjects,
) -> Result<(), StorageError> {
    storage.save_json(CLICKUP_PROJECTS_PATH, projects).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> Storage {
        Storage::Local(LocalStorage::new(dir.path().to_path_buf()))
    }

    #[tokio::test]
    async fn missing_tracker_loads_empty() {
        let dir = TempDir::new().unwrap();
        let t = ReportTracker::load(&storage(&dir)).await;
        assert!(t.projects.is_empty());
    }

    #[tokio::test]
    async fn corrupt_tracker_loads_empty() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        s.save_text(CHANNEL_TRACKER_PATH, "[[[").await.unwrap();
        assert!(ChannelTracker::load(&s).await.channels.is_empty());
    }

    #[tokio::test]
    async fn report_tracker_accepts_numeric_ts() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        s.save_text(
            REPORT_TRACKER_PATH,
            r#"{"apollo": {"report_path": "slack_project_reports/apollo.txt", "last_ts": 1712345678.5}}"#,
        )
        .await
        .unwrap();
        let t = ReportTracker::load(&s).await;
        let entry = t.get("apollo").unwrap();
        assert_eq!(parse_ts(&entry.last_ts), 1712345678.5);
        assert_eq!(t.project_names(), vec!["apollo"]);
    }

    #[tokio::test]
    async fn channel_register_and_update() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        let mut t = ChannelTracker::default();
        assert!(t.register("C01", "apollo-dev", "apollo"));
        assert!(!t.register("C01", "other", "other"));
        assert_eq!(t.last_ts("C01"), "0");
        assert_eq!(t.last_ts("C99"), "0");
        t.update_last_ts("C01", "1712.0002").unwrap();
        t.save(&s).await.unwrap();

        let back = ChannelTracker::load(&s).await;
        assert_eq!(back.last_ts("C01"), "1712.0002");
        assert_eq!(back.channels["C01"].name, "apollo-dev");
    }

    #[test]
    fn update_unknown_channel_errors() {
        let mut t = ChannelTracker::default();
        assert!(matches!(
            t.update_last_ts("C404", "1.0"),
            Err(TrackerError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn processed_ids_persist() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        let mut ids = ProcessedIds::load(&s, PROCESSED_EMAILS_PATH).await;
        assert!(ids.is_empty());
        ids.mark(&s, "m1").await.unwrap();
        ids.mark(&s, "m1").await.unwrap();
        let back = ProcessedIds::load(&s, PROCESSED_EMAILS_PATH).await;
        assert!(back.contains("m1"));
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn parse_ts_tolerates_garbage() {
        assert_eq!(parse_ts("1712345678.000200"), 1712345678.0002);
        assert_eq!(parse_ts("bogus"), 0.0);
    }
}
