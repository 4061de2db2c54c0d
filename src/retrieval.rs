//! Ensemble retrieval over several vector stores.
//!
//! The query is embedded once and sent to every store. Per-store rankings are
//! merged with weighted reciprocal-rank fusion:
//!
//! ```text
//! score(doc) = Σ_i weight_i / (rank_i(doc) + c)      rank is 1-based
//! ```
//!
//! Documents are identified by their text, so the same chunk returned by two
//! stores is counted once with both contributions. Equal scores keep the
//! order in which documents were first seen.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::RetrievalConfig;
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::vector::{Document, ScoredDocument, VectorStore};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("all retrievers failed: {0}")]
    AllFailed(String),
}

/// One member of the ensemble.
#[derive(Debug, Clone)]
pub struct Retriever {
    pub name: String,
    pub store: VectorStore,
    pub weight: f32,
    pub k: usize,
}

#[derive(Debug, Clone)]
pub struct EnsembleRetriever {
    retrievers: Vec<Retriever>,
    c: f32,
}

impl EnsembleRetriever {
    pub fn new(retrievers: Vec<Retriever>, c: f32) -> Self {
        Self { retrievers, c }
    }

    /// Pair each configured store with its client, in config order.
    pub fn from_config(config: &RetrievalConfig, stores: &HashMap<String, VectorStore>) -> Self {
        let retrievers = config
            .stores
            .iter()
            .filter_map(|s| {
                stores.get(&s.name).map(|store| Retriever {
                    name: s.name.clone(),
                    store: store.clone(),
                    weight: s.weight,
                    k: s.k,
                })
            })
            .collect();
        Self::new(retrievers, config.rrf_c)
    }

    pub fn len(&self) -> usize {
        self.retrievers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retrievers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.retrievers.iter().map(|r| r.name.as_str()).collect()
    }

    /// Retrieve and fuse. A failing store is logged and left out; only when
    /// every store fails is the whole call an error.
    pub async fn retrieve(
        &self,
        embedder: &EmbeddingProvider,
        query: &str,
    ) -> Result<Vec<ScoredDocument>, RetrievalError> {
        if self.retrievers.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = embedder.embed(query).await?;

        let mut ranked = Vec::with_capacity(self.retrievers.len());
        let mut errors = Vec::new();
        for r in &self.retrievers {
            match r.store.query(&embedding, r.k).await {
                Ok(hits) => {
                    debug!(retriever = %r.name, hits = hits.len(), "retriever returned");
                    ranked.push((r.weight, hits.into_iter().map(|h| h.document).collect()));
                }
                Err(e) => {
                    warn!(retriever = %r.name, error = %e, "retriever failed, skipping");
                    errors.push(format!("{}: {e}", r.name));
                }
            }
        }

        if ranked.is_empty() {
            return Err(RetrievalError::AllFailed(errors.join("; ")));
        }
        Ok(fuse(&ranked, self.c))
    }
}

/// Weighted reciprocal-rank fusion of `(weight, ranked documents)` lists.
pub fn fuse(lists: &[(f32, Vec<Document>)], c: f32) -> Vec<ScoredDocument> {
    let mut scores: HashMap<&str, f32> = HashMap::new();
    let mut order: Vec<&Document> = Vec::new();

    for (weight, docs) in lists {
        for (i, doc) in docs.iter().enumerate() {
            let rank = (i + 1) as f32;
            let entry = scores.entry(doc.page_content.as_str()).or_insert_with(|| {
                order.push(doc);
                0.0
            });
            *entry += weight / (rank + c);
        }
    }

    let mut fused: Vec<ScoredDocument> = order
        .into_iter()
        .map(|doc| ScoredDocument {
            score: scores.get(doc.page_content.as_str()).copied().unwrap_or(0.0),
            document: doc.clone(),
        })
        .collect();
    // Stable: ties keep first-seen order.
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DummyEmbedder;
    use crate::vector::MemoryStore;

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    fn texts(fused: &[ScoredDocument]) -> Vec<&str> {
        fused.iter().map(|d| d.document.page_content.as_str()).collect()
    }

    #[test]
    fn shared_document_accumulates_score() {
        let fused = fuse(
            &[(0.5, docs(&["a", "b"])), (0.5, docs(&["b", "c"]))],
            60.0,
        );
        assert_eq!(texts(&fused), vec!["b", "a", "c"]);
        let b = &fused[0];
        assert!((b.score - (0.5 / 62.0 + 0.5 / 61.0)).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let fused = fuse(&[(0.5, docs(&["x"])), (0.5, docs(&["y"]))], 60.0);
        assert_eq!(texts(&fused), vec!["x", "y"]);
    }

    #[test]
    fn weights_shift_ranking() {
        let fused = fuse(&[(0.2, docs(&["low"])), (0.4, docs(&["high"]))], 60.0);
        assert_eq!(texts(&fused), vec!["high", "low"]);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(fuse(&[(0.5, Vec::new())], 60.0).is_empty());
    }

    #[tokio::test]
    async fn retrieve_merges_memory_stores() {
        let embedder = EmbeddingProvider::Dummy(DummyEmbedder::new(128));
        let drive = MemoryStore::default();
        let meetings = MemoryStore::default();
        let put = |store: &MemoryStore, text: &'static str| {
            let store = store.clone();
            let embedder = embedder.clone();
            async move {
                let e = embedder.embed(text).await.unwrap();
                store.upsert(&[Document::new(text)], &[e]).await;
            }
        };
        put(&drive, "apollo launch plan for march").await;
        put(&drive, "office snack budget").await;
        put(&meetings, "apollo launch retro notes").await;

        let ensemble = EnsembleRetriever::new(
            vec![
                Retriever {
                    name: "drive".into(),
                    store: VectorStore::Memory(drive),
                    weight: 0.5,
                    k: 1,
                },
                Retriever {
                    name: "meetings".into(),
                    store: VectorStore::Memory(meetings),
                    weight: 0.5,
                    k: 1,
                },
            ],
            60.0,
        );
        let hits = ensemble.retrieve(&embedder, "apollo launch").await.unwrap();
        let got = texts(&hits);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"apollo launch plan for march"));
        assert!(got.contains(&"apollo launch retro notes"));
    }

    fn unreachable_store() -> VectorStore {
        VectorStore::Pinecone(
            crate::vector::PineconeStore::new("http://127.0.0.1:1".into(), None, "k".into(), 1)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn failing_retriever_is_skipped() {
        let embedder = EmbeddingProvider::Dummy(DummyEmbedder::new(16));
        let good = MemoryStore::default();
        good.upsert(&[Document::new("kept")], &[embedder.embed("kept").await.unwrap()])
            .await;
        let ensemble = EnsembleRetriever::new(
            vec![
                Retriever {
                    name: "down".into(),
                    store: unreachable_store(),
                    weight: 0.5,
                    k: 3,
                },
                Retriever {
                    name: "up".into(),
                    store: VectorStore::Memory(good),
                    weight: 0.5,
                    k: 3,
                },
            ],
            60.0,
        );
        let hits = ensemble.retrieve(&embedder, "kept").await.unwrap();
        assert_eq!(texts(&hits), vec!["kept"]);
    }

    #[tokio::test]
    async fn all_failing_is_an_error() {
        let embedder = EmbeddingProvider::Dummy(DummyEmbedder::new(16));
        let ensemble = EnsembleRetriever::new(
            vec![Retriever {
                name: "down".into(),
                store: unreachable_store(),
                weight: 1.0,
                k: 3,
            }],
            60.0,
        );
        let err = ensemble.retrieve(&embedder, "q").await.unwrap_err();
        assert!(matches!(err, RetrievalError::AllFailed(msg) if msg.contains("down")));
    }

    #[tokio::test]
    async fn no_retrievers_returns_empty() {
        let embedder = EmbeddingProvider::Dummy(DummyEmbedder::new(8));
        let ensemble = EnsembleRetriever::new(Vec::new(), 60.0);
        assert!(ensemble.retrieve(&embedder, "q").await.unwrap().is_empty());
    }
}
