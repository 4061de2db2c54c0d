// Library root: the binary in src/main.rs and the integration tests in
// tests/ both build on these modules.

pub mod assistant;
pub mod bootstrap;
pub mod chunking;
pub mod core;
pub mod embeddings;
pub mod llm;
pub mod prompts;
pub mod reports;
pub mod retrieval;
pub mod services;
pub mod sources;
pub mod storage;
pub mod subsystems;
pub mod trackers;
pub mod vector;
