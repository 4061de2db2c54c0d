//! Public configuration structs consumed by the rest of the crate.

use std::env;
use std::path::PathBuf;

// ── Comms ───────────────────────────────────────────────────────────────────

/// PTY (console) channel configuration.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub enabled: bool,
}

/// HTTP query API configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    /// Socket address to bind the HTTP channel to.
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub pty: PtyConfig,
    pub http: HttpConfig,
}

// ── LLM ─────────────────────────────────────────────────────────────────────

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

/// Google Gemini provider configuration (`[llm.gemini]`).
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API root, without the `/v1beta/models/...` suffix.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider: `"dummy"`, `"scripted"`, `"openai"` or `"gemini"`.
    pub provider: String,
    pub openai: OpenAiConfig,
    pub gemini: GeminiConfig,
    /// Canned replies for the `scripted` provider, returned in order.
    pub scripted_replies: Vec<String>,
    /// Latency the `scripted` provider adds to every reply.
    pub scripted_delay_ms: u64,
}

// ── Embeddings ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    /// `"dummy"` or `"gemini"`.
    pub provider: String,
    pub model: String,
    pub api_base_url: String,
    pub dimensions: usize,
    pub timeout_seconds: u64,
}

// ── Storage ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// `"local"` or `"gcs"`.
    pub backend: String,
    /// Root directory for the local backend (already expanded).
    pub root: PathBuf,
    pub bucket: Option<String>,
}

// ── Retrieval ───────────────────────────────────────────────────────────────

/// One vector store participating in the ensemble (`[[retrieval.stores]]`).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name referenced by the ingest sections (`store = "drive"`).
    pub name: String,
    /// `"pinecone"`, `"chroma"` or `"memory"`.
    pub kind: String,
    /// Pinecone index host or Chroma server root.
    pub url: String,
    /// Chroma collection name.
    pub collection: Option<String>,
    /// Pinecone namespace.
    pub namespace: Option<String>,
    pub weight: f32,
    pub k: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub stores: Vec<StoreConfig>,
    /// Reciprocal-rank-fusion constant.
    pub rrf_c: f32,
}

// ── Assistant ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Run the second "reasoning" pass that revises the first answer.
    pub reasoning: bool,
    /// Rewrite the user query with the LLM before retrieval.
    pub rewrite_query: bool,
}

// ── Ingestion ───────────────────────────────────────────────────────────────

/// Sliding-window chunking parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub size: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub api_base_url: String,
    pub page_limit: u32,
    pub page_delay_seconds: u64,
    pub thread_delay_seconds: u64,
    pub channel_delay_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub max_results: u32,
    pub store: String,
    pub chunk: ChunkSettings,
}

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub page_size: u32,
    pub folder_id: Option<String>,
    pub store: String,
    pub chunk: ChunkSettings,
}

#[derive(Debug, Clone)]
pub struct MeetingsConfig {
    pub folder_id: Option<String>,
    pub page_size: u32,
    pub store: String,
    pub chunk: ChunkSettings,
    /// Number of leading characters shown to the project classifier.
    pub detect_chars: usize,
}

#[derive(Debug, Clone)]
pub struct ClickupConfig {
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct GoogleAuthConfig {
    /// Token cache file (already expanded).
    pub token_file: PathBuf,
    /// How long the browser consent flow waits for the redirect.
    pub consent_timeout_seconds: u64,
    /// Whether a missing token may start the browser consent flow. Never
    /// read from TOML; only `onequery sync` turns it on.
    pub interactive_consent: bool,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub slack: SlackConfig,
    pub gmail: GmailConfig,
    pub drive: DriveConfig,
    pub meetings: MeetingsConfig,
    pub clickup: ClickupConfig,
    pub google: GoogleAuthConfig,
}

// ── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReportsConfig {
    /// Slack messages folded into the report per LLM call.
    pub batch_size: usize,
    /// Pause between consecutive LLM calls.
    pub delay_seconds: u64,
}

// ── Schedule ────────────────────────────────────────────────────────────────

/// Interval per background job, in seconds. `None` disables the job.
#[derive(Debug, Clone, Default)]
pub struct ScheduleConfig {
    pub slack_secs: Option<u64>,
    pub reports_secs: Option<u64>,
    pub gmail_secs: Option<u64>,
    pub drive_secs: Option<u64>,
    pub meetings_secs: Option<u64>,
    pub clickup_secs: Option<u64>,
}

// ── Secrets ─────────────────────────────────────────────────────────────────

/// Credentials. Sourced from the environment only, never from TOML.
#[derive(Clone, Default)]
pub struct Secrets {
    pub llm_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub chroma_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub clickup_api_token: Option<String>,
    pub gcs_access_token: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            llm_api_key: var("LLM_API_KEY"),
            google_api_key: var("GOOGLE_API_KEY"),
            pinecone_api_key: var("PINECONE_API_KEY"),
            chroma_api_key: var("CHROMA_API_KEY"),
            slack_bot_token: var("SLACK_BOT_TOKEN"),
            clickup_api_token: var("CLICKUP_API_TOKEN"),
            gcs_access_token: var("GCS_ACCESS_TOKEN"),
            google_client_id: var("GOOGLE_CLIENT_ID"),
            google_client_secret: var("GOOGLE_CLIENT_SECRET"),
            google_redirect_uri: var("GOOGLE_REDIRECT_URI"),
        }
    }
}

// Never print secret values, only whether they are set.
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| v.is_some();
        f.debug_struct("Secrets")
            .field("llm_api_key", &set(&self.llm_api_key))
            .field("google_api_key", &set(&self.google_api_key))
            .field("pinecone_api_key", &set(&self.pinecone_api_key))
            .field("chroma_api_key", &set(&self.chroma_api_key))
            .field("slack_bot_token", &set(&self.slack_bot_token))
            .field("clickup_api_token", &set(&self.clickup_api_token))
            .field("gcs_access_token", &set(&self.gcs_access_token))
            .field("google_client_id", &set(&self.google_client_id))
            .finish_non_exhaustive()
    }
}

// ── Top-level ───────────────────────────────────────────────────────────────

/// Fully-resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    /// Working directory for local state (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// Directory searched for prompt template overrides.
    pub prompts_dir: PathBuf,
    pub comms: CommsConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub assistant: AssistantConfig,
    pub ingest: IngestConfig,
    pub reports: ReportsConfig,
    pub schedule: ScheduleConfig,
    pub secrets: Secrets,
}

impl Config {
    /// Look up a retrieval store by name.
    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.retrieval.stores.iter().find(|s| s.name == name)
    }
}
