//! Shared runtime handles.
//!
//! [`Services`] is built once at startup from [`Config`] and shared as
//! `Arc<Services>` by the comms channels, the scheduler and the CLI. Every
//! handle inside is cheap to clone.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::core::config::Config;
use crate::core::error::AppError;
use crate::embeddings::{self, EmbeddingProvider};
use crate::llm::{self, LlmProvider};
use crate::prompts::PromptBuilder;
use crate::retrieval::EnsembleRetriever;
use crate::storage::{self, Storage};
use crate::vector::{self, VectorStore};

#[derive(Debug)]
pub struct Services {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub llm: LlmProvider,
    pub embedder: EmbeddingProvider,
    stores: HashMap<String, VectorStore>,
    pub retriever: EnsembleRetriever,
}

impl Services {
    /// Construct every client named in `config`. No network calls are made.
    pub fn build(config: Config) -> Result<Self, AppError> {
        let secrets = &config.secrets;

        let llm_key = match config.llm.provider.as_str() {
            "gemini" => secrets
                .google_api_key
                .clone()
                .or_else(|| secrets.llm_api_key.clone()),
            _ => secrets.llm_api_key.clone(),
        };
        let llm = llm::providers::build(&config.llm, llm_key)
            .map_err(|e| AppError::Llm(e.to_string()))?;

        let embedder = embeddings::build(&config.embeddings, secrets.google_api_key.clone())
            .map_err(|e| AppError::Embedding(e.to_string()))?;

        let storage = storage::build(&config.storage, secrets)
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let mut stores = HashMap::new();
        for store_cfg in &config.retrieval.stores {
            let store = vector::build(store_cfg, secrets)
                .map_err(|e| AppError::VectorStore(format!("{}: {e}", store_cfg.name)))?;
            stores.insert(store_cfg.name.clone(), store);
        }

        info!(
            llm = llm.name(),
            storage = %storage.describe(),
            stores = stores.len(),
            "services ready"
        );

        Ok(Self::from_parts(config, storage, llm, embedder, stores))
    }

    /// Assemble from already-built handles.
    pub fn from_parts(
        config: Config,
        storage: Storage,
        llm: LlmProvider,
        embedder: EmbeddingProvider,
        stores: HashMap<String, VectorStore>,
    ) -> Self {
        let retriever = EnsembleRetriever::from_config(&config.retrieval, &stores);
        Self {
            config: Arc::new(config),
            storage,
            llm,
            embedder,
            stores,
            retriever,
        }
    }

    pub fn store(&self, name: &str) -> Option<&VectorStore> {
        self.stores.get(name)
    }

    /// A prompt builder rooted at the configured override directory.
    pub fn prompts(&self) -> PromptBuilder {
        PromptBuilder::new(self.config.prompts_dir.clone())
    }

    /// Ask the LLM and return the trimmed reply text.
    pub async fn ask_llm(&self, prompt: &str) -> Result<String, llm::ProviderError> {
        let response = self.llm.complete(prompt, None).await?;
        if let Some(usage) = response.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "llm usage"
            );
        }
        Ok(response.text.trim().to_string())
    }
}

#[cfg(test)]
impl Services {
    /// Test services over `work_dir`: local storage, in-memory stores, the
    /// given LLM.
    pub fn for_tests(work_dir: &std::path::Path, llm: LlmProvider) -> Self {
        let config = Config::test_default(work_dir);
        let storage = Storage::Local(crate::storage::LocalStorage::new(config.storage.root.clone()));
        let embedder = EmbeddingProvider::Dummy(crate::embeddings::DummyEmbedder::new(
            config.embeddings.dimensions,
        ));
        let stores = config
            .retrieval
            .stores
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    VectorStore::Memory(crate::vector::MemoryStore::default()),
                )
            })
            .collect();
        Self::from_parts(config, storage, llm, embedder, stores)
    }
}
