//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory, called once at startup.

pub mod dummy;
pub mod gemini;
pub mod openai_compatible;
pub mod scripted;

use std::time::Duration;

use crate::core::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` from config and an optional API key.
///
/// `api_key` comes from the environment, never TOML. It may be `None` for
/// keyless local OpenAI-compatible servers; Gemini requires one.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "scripted" => Ok(LlmProvider::Scripted(
            scripted::ScriptedProvider::new(config.scripted_replies.clone())
                .with_delay(Duration::from_millis(config.scripted_delay_ms)),
        )),
        "openai" | "openai-compatible" => {
            let p = openai_compatible::OpenAiCompatibleProvider::new(&config.openai, api_key)?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        "gemini" => {
            let g = &config.gemini;
            let key = api_key.ok_or_else(|| ProviderError::MissingApiKey("gemini".into()))?;
            let p = gemini::GeminiProvider::new(
                g.api_base_url.clone(),
                g.model.clone(),
                g.temperature,
                g.timeout_seconds,
                key,
            )?;
            Ok(LlmProvider::Gemini(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}
