//! Google OAuth 2.0 for installed apps (PKCE + loopback redirect).
//!
//! `onequery sync` prints an authorization URL, opens a browser and waits
//! (bounded by `consent_timeout_seconds`) for Google to redirect back to the
//! loopback listener. Tokens are cached in the configured token file and
//! refreshed when they are about to expire. Scheduled runs never start the
//! consent flow: without a usable token they fail with `MissingCredential`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SourceError;
use crate::core::config::Config;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8765/oauth2/callback";

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/drive.readonly",
];

/// Refresh this many seconds before the recorded expiry.
const EXPIRY_SLACK_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TokenCache {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: u64,
}

impl TokenCache {
    fn is_fresh(&self, now: u64) -> bool {
        self.expires_at > now + EXPIRY_SLACK_SECS
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

/// OAuth client for Gmail and Drive.
#[derive(Debug, Clone)]
pub struct GoogleAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    token_file: PathBuf,
    interactive: bool,
    consent_timeout: Duration,
}

impl GoogleAuth {
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self, SourceError> {
        let secrets = &config.secrets;
        let client_id = secrets
            .google_client_id
            .clone()
            .ok_or_else(|| SourceError::MissingCredential("GOOGLE_CLIENT_ID".into()))?;
        Ok(Self {
            http,
            client_id,
            client_secret: secrets.google_client_secret.clone(),
            redirect_uri: secrets
                .google_redirect_uri
                .clone()
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            token_file: config.ingest.google.token_file.clone(),
            interactive: config.ingest.google.interactive_consent,
            consent_timeout: Duration::from_secs(config.ingest.google.consent_timeout_seconds),
        })
    }

    /// A valid access token: cached, refreshed, or (interactive runs only)
    /// from a fresh consent flow.
    pub async fn access_token(&self) -> Result<String, SourceError> {
        if let Some(cache) = load_cache(&self.token_file) {
            if cache.is_fresh(now_unix()) {
                return Ok(cache.access_token);
            }
            if let Some(refresh) = cache.refresh_token.clone() {
                match self.refresh(&refresh).await {
                    Ok(token) => {
                        let merged = TokenCache {
                            access_token: token.access_token,
                            refresh_token: token.refresh_token.or(Some(refresh)),
                            expires_at: now_unix() + token.expires_in.unwrap_or(3600),
                        };
                        save_cache(&self.token_file, &merged)?;
                        debug!("google access token refreshed");
                        return Ok(merged.access_token);
                    }
                    Err(e) => warn!(error = %e, "token refresh failed"),
                }
            }
        }
        if !self.interactive {
            return Err(SourceError::MissingCredential(format!(
                "no usable Google token in {}; run `onequery sync gmail` once to authorize",
                self.token_file.display()
            )));
        }
        self.authorize().await
    }

    async fn authorize(&self) -> Result<String, SourceError> {
        let (port, path) = parse_loopback_redirect_uri(&self.redirect_uri)?;
        let state = Uuid::new_v4().to_string();
        let verifier = random_verifier();
        let challenge = code_challenge_s256(&verifier);
        let auth_url = build_auth_url(&self.client_id, &self.redirect_uri, &state, &challenge)?;

        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            SourceError::Auth(format!("failed to bind callback server on 127.0.0.1:{port}: {e}"))
        })?;

        info!("google authorization required");
        println!("Open this URL to authorize access to Gmail and Drive:\n{auth_url}");
        open_browser(&auth_url);

        let code = receive_auth_code(listener, &state, &path, self.consent_timeout).await?;

        let token = self.exchange_code(&code, &verifier).await?;
        let cache = TokenCache {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: now_unix() + token.expires_in.unwrap_or(3600),
        };
        save_cache(&self.token_file, &cache)?;
        Ok(cache.access_token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, SourceError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", &self.client_id),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret));
        }
        self.token_request(&form, "refresh").await
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenResponse, SourceError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", &self.client_id),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", &self.redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret));
        }
        self.token_request(&form, "token exchange").await
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
        what: &str,
    ) -> Result<TokenResponse, SourceError> {
        let res = self
            .http
            .post(TOKEN_URL)
            .form(form)
            .send()
            .await
            .map_err(|e| SourceError::Auth(format!("{what} request failed: {e}")))?;
        if !res.status().is_success() {
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SourceError::Auth(format!("{what} failed: {body}")));
        }
        res.json::<TokenResponse>()
            .await
            .map_err(|e| SourceError::Auth(format!("{what} parse failed: {e}")))
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

fn random_verifier() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn code_challenge_s256(verifier: &str) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn build_auth_url(
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<String, SourceError> {
    let mut url =
        Url::parse(AUTH_URL).map_err(|e| SourceError::Auth(format!("invalid auth URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url.into())
}

fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    if let Err(e) = Command::new(opener).arg(url).spawn() {
        debug!(error = %e, "could not open a browser; use the printed URL");
    }
}

async fn write_http_ok(stream: &mut TcpStream, body: &str) -> Result<(), SourceError> {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| SourceError::Auth(format!("failed writing callback response: {e}")))
}

fn page(title: &str) -> String {
    format!("<html><body><h1>{title}</h1><p>Return to the terminal.</p></body></html>")
}

/// Wait up to `timeout` for one callback request and pull `code` out of it.
async fn receive_auth_code(
    listener: TcpListener,
    expected_state: &str,
    expected_path: &str,
    timeout: Duration,
) -> Result<String, SourceError> {
    let port = listener
        .local_addr()
        .map_err(|e| SourceError::Auth(format!("callback listener has no address: {e}")))?
        .port();
    let (mut stream, _) = tokio::time::timeout(timeout, listener.accept())
        .await
        .map_err(|_| {
            SourceError::Auth(format!(
                "no authorization callback within {}s",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| SourceError::Auth(format!("failed accepting callback connection: {e}")))?;

    let mut buf = [0_u8; 8192];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| SourceError::Auth("callback request was never sent".into()))?
        .map_err(|e| SourceError::Auth(format!("read callback request failed: {e}")))?;
    let raw = String::from_utf8_lossy(&buf[..n]);
    let target = raw
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| SourceError::Auth("invalid callback request line".into()))?;

    match parse_callback(port, target, expected_state, expected_path) {
        Ok(code) => {
            let _ = write_http_ok(&mut stream, &page("Authorization complete")).await;
            Ok(code)
        }
        Err(e) => {
            let _ = write_http_ok(&mut stream, &page("Authorization failed")).await;
            Err(e)
        }
    }
}

/// Validate the callback request target and return the authorization code.
fn parse_callback(
    port: u16,
    target: &str,
    expected_state: &str,
    expected_path: &str,
) -> Result<String, SourceError> {
    let parsed = Url::parse(&format!("http://127.0.0.1:{port}{target}"))
        .map_err(|e| SourceError::Auth(format!("failed to parse callback URI: {e}")))?;
    if parsed.path() != expected_path {
        return Err(SourceError::Auth(format!(
            "unexpected callback path: {}",
            parsed.path()
        )));
    }

    let mut code = None;
    let mut state = None;
    for (k, v) in parsed.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.to_string()),
            "state" => state = Some(v.to_string()),
            "error" => return Err(SourceError::Auth(format!("oauth error from callback: {v}"))),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state) {
        return Err(SourceError::Auth("callback state mismatch".into()));
    }
    code.ok_or_else(|| SourceError::Auth("callback did not include code".into()))
}

fn parse_loopback_redirect_uri(uri: &str) -> Result<(u16, String), SourceError> {
    let parsed =
        Url::parse(uri).map_err(|e| SourceError::Auth(format!("invalid redirect URI: {e}")))?;
    if parsed.scheme() != "http" {
        return Err(SourceError::Auth("redirect URI must use http loopback".into()));
    }
    let host = parsed.host_str().unwrap_or_default();
    if host != "127.0.0.1" && host != "localhost" {
        return Err(SourceError::Auth(
            "redirect URI host must be 127.0.0.1 or localhost".into(),
        ));
    }
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| SourceError::Auth("redirect URI must include port".into()))?;
    let path = if parsed.path().is_empty() {
        "/".to_string()
    } else {
        parsed.path().to_string()
    };
    Ok((port, path))
}

fn load_cache(path: &Path) -> Option<TokenCache> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice::<TokenCache>(&bytes).ok()
}

fn save_cache(path: &Path, cache: &TokenCache) -> Result<(), SourceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SourceError::Auth(format!("failed creating token dir: {e}")))?;
    }
    let data = serde_json::to_vec_pretty(cache)
        .map_err(|e| SourceError::Auth(format!("token serialize failed: {e}")))?;
    std::fs::write(path, data).map_err(|e| SourceError::Auth(format!("token write failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pkce_challenge_matches_rfc7636_example() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge_s256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_length_is_valid() {
        let v = random_verifier();
        assert!((43..=128).contains(&v.len()));
    }

    #[test]
    fn auth_url_carries_both_scopes() {
        let url = build_auth_url("cid", DEFAULT_REDIRECT_URI, "st", "ch").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let scope = parsed
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.to_string())
            .unwrap();
        assert!(scope.contains("gmail.readonly"));
        assert!(scope.contains("drive.readonly"));
    }

    #[test]
    fn loopback_uri_parsing() {
        assert_eq!(
            parse_loopback_redirect_uri("http://localhost:9000/cb").unwrap(),
            (9000, "/cb".to_string())
        );
        assert!(parse_loopback_redirect_uri("https://127.0.0.1:9000/cb").is_err());
        assert!(parse_loopback_redirect_uri("http://example.com:9000/cb").is_err());
    }

    #[test]
    fn callback_validation() {
        let ok = parse_callback(9000, "/cb?code=abc&state=s1", "s1", "/cb").unwrap();
        assert_eq!(ok, "abc");
        assert!(parse_callback(9000, "/cb?code=abc&state=other", "s1", "/cb").is_err());
        assert!(parse_callback(9000, "/wrong?code=abc&state=s1", "s1", "/cb").is_err());
        assert!(parse_callback(9000, "/cb?error=access_denied&state=s1", "s1", "/cb").is_err());
    }

    fn auth_for(dir: &TempDir, interactive: bool) -> GoogleAuth {
        let mut config = Config::test_default(dir.path());
        config.secrets.google_client_id = Some("cid".into());
        config.ingest.google.interactive_consent = interactive;
        GoogleAuth::from_config(&config, reqwest::Client::new()).unwrap()
    }

    #[tokio::test]
    async fn scheduled_run_without_token_fails_fast() {
        let dir = TempDir::new().unwrap();
        let auth = auth_for(&dir, false);
        let err = tokio::time::timeout(Duration::from_secs(5), auth.access_token())
            .await
            .expect("must not wait for a browser")
            .unwrap_err();
        assert!(matches!(err, SourceError::MissingCredential(_)), "{err}");
        assert!(err.to_string().contains("onequery sync"));
    }

    #[tokio::test]
    async fn cached_fresh_token_is_used_without_consent() {
        let dir = TempDir::new().unwrap();
        let auth = auth_for(&dir, false);
        let cache = TokenCache {
            access_token: "cached".into(),
            refresh_token: None,
            expires_at: now_unix() + 3600,
        };
        save_cache(&auth.token_file, &cache).unwrap();
        assert_eq!(auth.access_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn callback_wait_times_out() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let err = receive_auth_code(listener, "s1", "/cb", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no authorization callback"));
    }

    #[tokio::test]
    async fn callback_request_yields_code() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /cb?code=abc&state=s1 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
                .await
                .unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await.unwrap();
            reply
        });
        let code = receive_auth_code(listener, "s1", "/cb", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, "abc");
        assert!(browser.await.unwrap().contains("Authorization complete"));
    }

    #[test]
    fn cache_roundtrip_and_freshness() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/token.json");
        let cache = TokenCache {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: 1_000,
        };
        save_cache(&path, &cache).unwrap();
        assert_eq!(load_cache(&path), Some(cache.clone()));
        assert!(cache.is_fresh(900));
        assert!(!cache.is_fresh(950));
    }
}
