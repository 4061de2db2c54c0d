//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape: serde target before resolution.
#[derive(Deserialize)]
pub(super) struct RawConfig {
    pub app: RawApp,
    #[serde(default)]
    pub comms: RawComms,
    #[serde(default)]
    pub llm: RawLlm,
    #[serde(default)]
    pub embeddings: RawEmbeddings,
    #[serde(default)]
    pub storage: RawStorage,
    #[serde(default)]
    pub retrieval: RawRetrieval,
    #[serde(default)]
    pub assistant: RawAssistant,
    #[serde(default)]
    pub ingest: RawIngest,
    #[serde(default)]
    pub reports: RawReports,
    #[serde(default)]
    pub schedule: RawSchedule,
}

#[derive(Deserialize)]
pub(super) struct RawApp {
    pub name: String,
    pub work_dir: String,
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
}

// ── Comms ───────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawComms {
    #[serde(default)]
    pub pty: RawPty,
    #[serde(default)]
    pub http: RawHttp,
}

#[derive(Deserialize)]
pub(super) struct RawPty {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RawPty {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Deserialize)]
pub(super) struct RawHttp {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: false, bind: default_http_bind() }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub openai: RawOpenAiConfig,
    #[serde(default)]
    pub gemini: RawGeminiConfig,
    #[serde(default)]
    pub scripted_replies: Vec<String>,
    #[serde(default)]
    pub scripted_delay_ms: u64,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            openai: RawOpenAiConfig::default(),
            gemini: RawGeminiConfig::default(),
            scripted_replies: Vec::new(),
            scripted_delay_ms: 0,
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawGeminiConfig {
    #[serde(default = "default_gemini_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawGeminiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_gemini_api_base_url(),
            model: default_gemini_model(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

// ── Embeddings ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawEmbeddings {
    #[serde(default = "default_embeddings_provider")]
    pub provider: String,
    #[serde(default = "default_embeddings_model")]
    pub model: String,
    #[serde(default = "default_gemini_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_embeddings_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawEmbeddings {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            model: default_embeddings_model(),
            api_base_url: default_gemini_api_base_url(),
            dimensions: default_embeddings_dimensions(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawStorage {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Relative paths resolve against `app.work_dir`.
    #[serde(default = "default_storage_root")]
    pub root: String,
    #[serde(default)]
    pub bucket: Option<String>,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            bucket: None,
        }
    }
}

// ── Retrieval ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawRetrieval {
    #[serde(default)]
    pub stores: Vec<RawStore>,
    #[serde(default = "default_rrf_c")]
    pub rrf_c: f32,
}

impl Default for RawRetrieval {
    fn default() -> Self {
        Self { stores: Vec::new(), rrf_c: default_rrf_c() }
    }
}

#[derive(Deserialize)]
pub(super) struct RawStore {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_store_timeout_seconds")]
    pub timeout_seconds: u64,
}

// ── Assistant ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawAssistant {
    #[serde(default = "default_true")]
    pub reasoning: bool,
    #[serde(default = "default_false")]
    pub rewrite_query: bool,
}

impl Default for RawAssistant {
    fn default() -> Self {
        Self { reasoning: true, rewrite_query: false }
    }
}

// ── Ingestion ───────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawIngest {
    #[serde(default)]
    pub slack: RawSlack,
    #[serde(default)]
    pub gmail: RawGmail,
    #[serde(default)]
    pub drive: RawDrive,
    #[serde(default)]
    pub meetings: RawMeetings,
    #[serde(default)]
    pub clickup: RawClickup,
    #[serde(default)]
    pub google: RawGoogleAuth,
}

#[derive(Deserialize)]
pub(super) struct RawSlack {
    #[serde(default = "default_slack_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_slack_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_slack_page_delay")]
    pub page_delay_seconds: u64,
    #[serde(default = "default_slack_thread_delay")]
    pub thread_delay_seconds: u64,
    #[serde(default = "default_slack_page_delay")]
    pub channel_delay_seconds: u64,
}

impl Default for RawSlack {
    fn default() -> Self {
        Self {
            api_base_url: default_slack_api_base_url(),
            page_limit: default_slack_page_limit(),
            page_delay_seconds: default_slack_page_delay(),
            thread_delay_seconds: default_slack_thread_delay(),
            channel_delay_seconds: default_slack_page_delay(),
        }
    }
}

#[derive(Deserialize, Default)]
pub(super) struct RawChunk {
    pub size: Option<usize>,
    pub overlap: Option<usize>,
}

#[derive(Deserialize)]
pub(super) struct RawGmail {
    #[serde(default = "default_gmail_max_results")]
    pub max_results: u32,
    #[serde(default = "default_gmail_store")]
    pub store: String,
    #[serde(default)]
    pub chunk: RawChunk,
}

impl Default for RawGmail {
    fn default() -> Self {
        Self {
            max_results: default_gmail_max_results(),
            store: default_gmail_store(),
            chunk: RawChunk::default(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawDrive {
    #[serde(default = "default_drive_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_drive_store")]
    pub store: String,
    #[serde(default)]
    pub chunk: RawChunk,
}

impl Default for RawDrive {
    fn default() -> Self {
        Self {
            page_size: default_drive_page_size(),
            folder_id: None,
            store: default_drive_store(),
            chunk: RawChunk::default(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawMeetings {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_meetings_page_size")]
    pub page_size: u32,
    #[serde(default = "default_meetings_store")]
    pub store: String,
    #[serde(default)]
    pub chunk: RawChunk,
    #[serde(default = "default_detect_chars")]
    pub detect_chars: usize,
}

impl Default for RawMeetings {
    fn default() -> Self {
        Self {
            folder_id: None,
            page_size: default_meetings_page_size(),
            store: default_meetings_store(),
            chunk: RawChunk::default(),
            detect_chars: default_detect_chars(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawClickup {
    #[serde(default = "default_clickup_api_base_url")]
    pub api_base_url: String,
}

impl Default for RawClickup {
    fn default() -> Self {
        Self { api_base_url: default_clickup_api_base_url() }
    }
}

#[derive(Deserialize)]
pub(super) struct RawGoogleAuth {
    /// Relative paths resolve against `app.work_dir`.
    #[serde(default = "default_google_token_file")]
    pub token_file: String,
    #[serde(default = "default_consent_timeout")]
    pub consent_timeout_seconds: u64,
}

impl Default for RawGoogleAuth {
    fn default() -> Self {
        Self {
            token_file: default_google_token_file(),
            consent_timeout_seconds: default_consent_timeout(),
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawReports {
    #[serde(default = "default_report_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_report_delay")]
    pub delay_seconds: u64,
}

impl Default for RawReports {
    fn default() -> Self {
        Self {
            batch_size: default_report_batch_size(),
            delay_seconds: default_report_delay(),
        }
    }
}

// ── Schedule ────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawSchedule {
    pub slack_every_secs: Option<u64>,
    pub reports_every_secs: Option<u64>,
    pub gmail_every_secs: Option<u64>,
    pub drive_every_secs: Option<u64>,
    pub meetings_every_secs: Option<u64>,
    pub clickup_every_secs: Option<u64>,
}

// ── Defaults ────────────────────────────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_false() -> bool {
    false
}

pub(super) fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

pub(super) fn default_prompts_dir() -> String {
    "config/prompts".to_string()
}

pub(super) fn default_llm_provider() -> String {
    "dummy".to_string()
}

pub(super) fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

pub(super) fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

pub(super) fn default_gemini_api_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

pub(super) fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

pub(super) fn default_temperature() -> f32 {
    0.2
}

pub(super) fn default_llm_timeout_seconds() -> u64 {
    60
}

pub(super) fn default_embeddings_provider() -> String {
    "dummy".to_string()
}

pub(super) fn default_embeddings_model() -> String {
    "embedding-001".to_string()
}

pub(super) fn default_embeddings_dimensions() -> usize {
    768
}

pub(super) fn default_storage_backend() -> String {
    "local".to_string()
}

pub(super) fn default_storage_root() -> String {
    "storage".to_string()
}

pub(super) fn default_rrf_c() -> f32 {
    60.0
}

pub(super) fn default_weight() -> f32 {
    0.5
}

pub(super) fn default_k() -> usize {
    3
}

pub(super) fn default_store_timeout_seconds() -> u64 {
    30
}

pub(super) fn default_slack_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

pub(super) fn default_slack_page_limit() -> u32 {
    20
}

pub(super) fn default_slack_page_delay() -> u64 {
    60
}

pub(super) fn default_slack_thread_delay() -> u64 {
    2
}

pub(super) fn default_gmail_max_results() -> u32 {
    15
}

pub(super) fn default_gmail_store() -> String {
    "drive".to_string()
}

pub(super) fn default_drive_page_size() -> u32 {
    10
}

pub(super) fn default_drive_store() -> String {
    "drive".to_string()
}

pub(super) fn default_meetings_page_size() -> u32 {
    100
}

pub(super) fn default_meetings_store() -> String {
    "meetings".to_string()
}

pub(super) fn default_detect_chars() -> usize {
    350
}

pub(super) fn default_clickup_api_base_url() -> String {
    "https://api.clickup.com/api/v2".to_string()
}

pub(super) fn default_google_token_file() -> String {
    "google_token.json".to_string()
}

pub(super) fn default_consent_timeout() -> u64 {
    300
}

pub(super) fn default_report_batch_size() -> usize {
    25
}

pub(super) fn default_report_delay() -> u64 {
    10
}

