//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `ONEQUERY_WORK_DIR` and `ONEQUERY_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::error::AppError;

use super::raw::{RawChunk, RawConfig, RawStore};
use super::types::*;

/// Minimal document used when no config file is given and
/// `config/default.toml` is absent. Every other section takes serde defaults.
const BUILTIN_DEFAULT: &str = r#"
[app]
name = "onequery"
work_dir = "~/.onequery"
log_level = "info"
"#;

/// Deep-merge two TOML values.
/// Tables are merged recursively; the overlay only needs the keys that differ
/// from the base. Any other type (string, integer, array of stores, …) is
/// replaced wholesale by the overlay value.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow its `[meta] base` chain and return the merged
/// value. `visited` holds canonical paths already seen so cycles fail fast.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let base_str = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
        .map(str::to_string);

    match base_str {
        Some(base_str) => {
            let base_path = if Path::new(&base_str).is_absolute() {
                PathBuf::from(&base_str)
            } else {
                path.parent().unwrap_or(Path::new(".")).join(&base_str)
            };
            let base_val = load_raw_merged(&base_path, visited)?;
            Ok(merge_toml(base_val, overlay_val))
        }
        None => Ok(overlay_val),
    }
}

/// Load config from the given path, or `config/default.toml`, then apply
/// env-var overrides. Without a path and without `config/default.toml`, the
/// built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("ONEQUERY_WORK_DIR").ok();
    let log_level_override = env::var("ONEQUERY_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        let value: toml::Value = toml::from_str(BUILTIN_DEFAULT)
            .map_err(|e| AppError::Config(format!("built-in defaults: {e}")))?;
        resolve(
            value,
            "<built-in>",
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    }
}

/// Internal loader: accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let merged = load_raw_merged(path, &mut HashSet::new())
        .map_err(|e| AppError::Config(format!("config error in {}: {e}", path.display())))?;
    resolve(
        merged,
        &path.display().to_string(),
        work_dir_override,
        log_level_override,
    )
}

fn resolve(
    value: toml::Value,
    origin: &str,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = Deserialize::deserialize(value).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {origin}: {e}"))
    })?;

    let app = parsed.app;
    let work_dir = expand_home(work_dir_override.unwrap_or(&app.work_dir));
    let log_level = log_level_override.unwrap_or(&app.log_level).to_string();
    let under_work_dir = |p: &str| {
        let p = expand_home(p);
        if p.is_absolute() { p } else { work_dir.join(p) }
    };

    let stores = parsed
        .retrieval
        .stores
        .into_iter()
        .map(resolve_store)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    for store in &stores {
        if !seen.insert(store.name.as_str()) {
            return Err(AppError::Config(format!(
                "duplicate retrieval store name: {}",
                store.name
            )));
        }
    }

    let ingest = parsed.ingest;
    let storage_root = under_work_dir(&parsed.storage.root);
    let token_file = under_work_dir(&ingest.google.token_file);
    let log_file = app.log_file.as_deref().map(under_work_dir);

    Ok(Config {
        app_name: app.name,
        log_level,
        log_file,
        prompts_dir: expand_home(&app.prompts_dir),
        comms: CommsConfig {
            pty: PtyConfig {
                enabled: parsed.comms.pty.enabled,
            },
            http: HttpConfig {
                enabled: parsed.comms.http.enabled,
                bind: parsed.comms.http.bind,
            },
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
            gemini: GeminiConfig {
                api_base_url: parsed.llm.gemini.api_base_url,
                model: parsed.llm.gemini.model,
                temperature: parsed.llm.gemini.temperature,
                timeout_seconds: parsed.llm.gemini.timeout_seconds,
            },
            scripted_replies: parsed.llm.scripted_replies,
            scripted_delay_ms: parsed.llm.scripted_delay_ms,
        },
        embeddings: EmbeddingsConfig {
            provider: parsed.embeddings.provider,
            model: parsed.embeddings.model,
            api_base_url: parsed.embeddings.api_base_url,
            dimensions: parsed.embeddings.dimensions.max(1),
            timeout_seconds: parsed.embeddings.timeout_seconds,
        },
        storage: StorageConfig {
            backend: parsed.storage.backend,
            root: storage_root,
            bucket: parsed.storage.bucket,
        },
        retrieval: RetrievalConfig {
            stores,
            rrf_c: parsed.retrieval.rrf_c,
        },
        assistant: AssistantConfig {
            reasoning: parsed.assistant.reasoning,
            rewrite_query: parsed.assistant.rewrite_query,
        },
        ingest: IngestConfig {
            slack: SlackConfig {
                api_base_url: ingest.slack.api_base_url,
                page_limit: ingest.slack.page_limit.max(1),
                page_delay_seconds: ingest.slack.page_delay_seconds,
                thread_delay_seconds: ingest.slack.thread_delay_seconds,
                channel_delay_seconds: ingest.slack.channel_delay_seconds,
            },
            gmail: GmailConfig {
                max_results: ingest.gmail.max_results.max(1),
                store: ingest.gmail.store,
                chunk: resolve_chunk(&ingest.gmail.chunk, 400, 60, "gmail")?,
            },
            drive: DriveConfig {
                page_size: ingest.drive.page_size.max(1),
                folder_id: ingest.drive.folder_id,
                store: ingest.drive.store,
                chunk: resolve_chunk(&ingest.drive.chunk, 600, 100, "drive")?,
            },
            meetings: MeetingsConfig {
                folder_id: ingest.meetings.folder_id,
                page_size: ingest.meetings.page_size.max(1),
                store: ingest.meetings.store,
                chunk: resolve_chunk(&ingest.meetings.chunk, 800, 150, "meetings")?,
                detect_chars: ingest.meetings.detect_chars,
            },
            clickup: ClickupConfig {
                api_base_url: ingest.clickup.api_base_url,
            },
            google: GoogleAuthConfig {
                token_file,
                consent_timeout_seconds: ingest.google.consent_timeout_seconds.max(1),
                interactive_consent: false,
            },
        },
        reports: ReportsConfig {
            batch_size: parsed.reports.batch_size.max(1),
            delay_seconds: parsed.reports.delay_seconds,
        },
        schedule: ScheduleConfig {
            slack_secs: nonzero(parsed.schedule.slack_every_secs),
            reports_secs: nonzero(parsed.schedule.reports_every_secs),
            gmail_secs: nonzero(parsed.schedule.gmail_every_secs),
            drive_secs: nonzero(parsed.schedule.drive_every_secs),
            meetings_secs: nonzero(parsed.schedule.meetings_every_secs),
            clickup_secs: nonzero(parsed.schedule.clickup_every_secs),
        },
        secrets: Secrets::from_env(),
        work_dir,
    })
}

fn resolve_store(raw: RawStore) -> Result<StoreConfig, AppError> {
    match raw.kind.as_str() {
        "pinecone" | "chroma" if raw.url.is_empty() => {
            return Err(AppError::Config(format!(
                "retrieval store '{}' ({}) needs a url",
                raw.name, raw.kind
            )));
        }
        "pinecone" | "chroma" | "memory" => {}
        other => {
            return Err(AppError::Config(format!(
                "retrieval store '{}': unknown kind '{other}'",
                raw.name
            )));
        }
    }
    if raw.weight < 0.0 {
        return Err(AppError::Config(format!(
            "retrieval store '{}': weight must not be negative",
            raw.name
        )));
    }
    Ok(StoreConfig {
        name: raw.name,
        kind: raw.kind,
        url: raw.url.trim_end_matches('/').to_string(),
        collection: raw.collection,
        namespace: raw.namespace,
        weight: raw.weight,
        k: raw.k.max(1),
        timeout_seconds: raw.timeout_seconds,
    })
}

fn resolve_chunk(
    raw: &RawChunk,
    size: usize,
    overlap: usize,
    section: &str,
) -> Result<ChunkSettings, AppError> {
    let settings = ChunkSettings {
        size: raw.size.unwrap_or(size),
        overlap: raw.overlap.unwrap_or(overlap),
    };
    if settings.size == 0 || settings.overlap >= settings.size {
        return Err(AppError::Config(format!(
            "ingest.{section}.chunk: overlap ({}) must be smaller than size ({})",
            settings.overlap, settings.size
        )));
    }
    Ok(settings)
}

fn nonzero(secs: Option<u64>) -> Option<u64> {
    secs.filter(|s| *s > 0)
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
