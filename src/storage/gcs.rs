//! Google Cloud Storage via the JSON API with a bearer access token.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{StorageError, validate_key};

const GCS_API: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GcsStorage {
    client: Client,
    base_url: String,
    bucket: String,
    token: String,
}

impl GcsStorage {
    pub fn new(bucket: String, token: String) -> Result<Self, StorageError> {
        Self::with_base_url(GCS_API.to_string(), bucket, token)
    }

    pub fn with_base_url(
        base_url: String,
        bucket: String,
        token: String,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            token,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `{base}/storage/v1/b/{bucket}/o/{object}` with the object name
    /// percent-encoded as a single path segment.
    fn object_url(&self, path: &str) -> Result<Url, StorageError> {
        let mut url = Url::parse(&format!("{}/storage/v1/b/{}/o", self.base_url, self.bucket))
            .map_err(|e| StorageError::Request(format!("bad GCS url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Request("GCS url cannot be a base".into()))?
            .push(path);
        Ok(url)
    }

    pub async fn load_text(&self, path: &str) -> Result<String, StorageError> {
        validate_key(path)?;
        let url = self.object_url(path)?;
        let response = self
            .client
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::Request(format!("GET {path}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(path.to_string()));
        }
        check(response, path)
            .await?
            .text()
            .await
            .map_err(|e| StorageError::Request(format!("GET {path}: {e}")))
    }

    pub async fn save_text(
        &self,
        path: &str,
        content: &str,
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate_key(path)?;
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket);
        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", path)])
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| StorageError::Request(format!("upload {path}: {e}")))?;
        check(response, path).await?;
        debug!(bucket = %self.bucket, path, bytes = content.len(), "uploaded object");
        Ok(())
    }

    pub async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        validate_key(path)?;
        let response = self
            .client
            .get(self.object_url(path)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::Request(format!("stat {path}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, path).await?;
        Ok(true)
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let url = format!("{}/storage/v1/b/{}/o", self.base_url, self.bucket);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(&url)
                .query(&[("prefix", prefix), ("fields", "items(name),nextPageToken")])
                .bearer_auth(&self.token);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let response = req
                .send()
                .await
                .map_err(|e| StorageError::Request(format!("list {prefix}: {e}")))?;
            let page: ListPage = check(response, prefix)
                .await?
                .json()
                .await
                .map_err(|e| StorageError::Request(format!("list {prefix}: {e}")))?;
            names.extend(page.items.into_iter().map(|o| o.name));
            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }
        Ok(names)
    }
}

async fn check(response: reqwest::Response, path: &str) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Request(format!("{path}: HTTP {status}: {body}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ObjectName>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectName {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_is_one_encoded_segment() {
        let s = GcsStorage::new("onequery-bucket".into(), "t".into()).unwrap();
        let url = s.object_url("slack_data/general.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/onequery-bucket/o/slack_data%2Fgeneral.json"
        );
    }

    #[test]
    fn list_page_parses() {
        let page: ListPage = serde_json::from_str(
            r#"{"items": [{"name": "slack_data/a.json"}], "nextPageToken": "abc"}"#,
        )
        .unwrap();
        assert_eq!(page.items[0].name, "slack_data/a.json");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }
}
