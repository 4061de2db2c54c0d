//! Object storage for trackers, Slack archives, reports and ClickUp data.
//!
//! Paths are always `/`-separated keys relative to the storage root
//! (`slack_data/general.json`, `slack_project_reports/report_tracker.json`).
//! `Local` maps them onto a directory; `Gcs` onto objects in a bucket.

mod gcs;
mod local;

pub use gcs::GcsStorage;
pub use local::LocalStorage;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::config::{Secrets, StorageConfig};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("storage io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("storage not configured: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub enum Storage {
    Local(LocalStorage),
    Gcs(GcsStorage),
}

impl Storage {
    pub async fn load_text(&self, path: &str) -> Result<String, StorageError> {
        match self {
            Storage::Local(s) => s.load_text(path).await,
            Storage::Gcs(s) => s.load_text(path).await,
        }
    }

    pub async fn save_text(&self, path: &str, content: &str) -> Result<(), StorageError> {
        match self {
            Storage::Local(s) => s.save_text(path, content).await,
            Storage::Gcs(s) => s.save_text(path, content, "text/plain; charset=utf-8").await,
        }
    }

    pub async fn load_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StorageError> {
        let text = self.load_text(path).await?;
        serde_json::from_str(&text).map_err(|source| StorageError::Json {
            path: path.to_string(),
            source,
        })
    }

    /// Pretty-printed JSON, two-space indent.
    pub async fn save_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
            path: path.to_string(),
            source,
        })?;
        match self {
            Storage::Local(s) => s.save_text(path, &text).await,
            Storage::Gcs(s) => s.save_text(path, &text, "application/json").await,
        }
    }

    /// Keys starting with `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = match self {
            Storage::Local(s) => s.list(prefix).await?,
            Storage::Gcs(s) => s.list(prefix).await?,
        };
        keys.sort();
        Ok(keys)
    }

    pub async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Local(s) => s.exists(path).await,
            Storage::Gcs(s) => s.exists(path).await,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Storage::Local(s) => format!("local:{}", s.root().display()),
            Storage::Gcs(s) => format!("gcs:{}", s.bucket()),
        }
    }
}

/// Construct the configured backend.
pub fn build(config: &StorageConfig, secrets: &Secrets) -> Result<Storage, StorageError> {
    match config.backend.as_str() {
        "local" => Ok(Storage::Local(LocalStorage::new(config.root.clone()))),
        "gcs" => {
            let bucket = config
                .bucket
                .clone()
                .ok_or_else(|| StorageError::Config("storage.bucket is required for gcs".into()))?;
            let token = secrets
                .gcs_access_token
                .clone()
                .ok_or_else(|| StorageError::Config("GCS_ACCESS_TOKEN is not set".into()))?;
            Ok(Storage::Gcs(GcsStorage::new(bucket, token)?))
        }
        other => Err(StorageError::Config(format!("unknown storage backend: {other}"))),
    }
}

/// Reject keys that could escape the storage root.
fn validate_key(path: &str) -> Result<(), StorageError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.split('/').any(|seg| seg == ".." || seg.is_empty())
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn local(dir: &TempDir) -> Storage {
        Storage::Local(LocalStorage::new(dir.path().to_path_buf()))
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("slack_data/general.json").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
    }

    #[tokio::test]
    async fn json_roundtrip_and_exists() {
        let dir = TempDir::new().unwrap();
        let s = local(&dir);
        let mut map = BTreeMap::new();
        map.insert("C1".to_string(), 3u32);
        assert!(!s.exists("trackers/t.json").await.unwrap());
        s.save_json("trackers/t.json", &map).await.unwrap();
        assert!(s.exists("trackers/t.json").await.unwrap());
        let back: BTreeMap<String, u32> = s.load_json("trackers/t.json").await.unwrap();
        assert_eq!(back, map);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = local(&dir).load_text("nope.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn bad_json_reports_path() {
        let dir = TempDir::new().unwrap();
        let s = local(&dir);
        s.save_text("broken.json", "{not json").await.unwrap();
        let err = s.load_json::<serde_json::Value>("broken.json").await.unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_sorted() {
        let dir = TempDir::new().unwrap();
        let s = local(&dir);
        s.save_text("slack_data/b.json", "[]").await.unwrap();
        s.save_text("slack_data/a.json", "[]").await.unwrap();
        s.save_text("slack_project_reports/a.txt", "r").await.unwrap();
        let keys = s.list("slack_data/").await.unwrap();
        assert_eq!(keys, vec!["slack_data/a.json", "slack_data/b.json"]);
    }

    #[test]
    fn gcs_requires_bucket_and_token() {
        let cfg = StorageConfig {
            backend: "gcs".into(),
            root: "/tmp".into(),
            bucket: Some("b".into()),
        };
        assert!(build(&cfg, &Secrets::default()).is_err());
        let secrets = Secrets {
            gcs_access_token: Some("t".into()),
            ..Secrets::default()
        };
        assert!(build(&cfg, &secrets).is_ok());
    }
}
