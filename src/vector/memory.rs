//! In-process brute-force vector store.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Document, ScoredDocument};
use crate::embeddings::{Embedding, cosine_similarity};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<Vec<(Document, Embedding)>>>,
}

impl MemoryStore {
    pub async fn upsert(&self, docs: &[Document], embeddings: &[Embedding]) -> usize {
        let mut entries = self.entries.write().await;
        for (doc, emb) in docs.iter().zip(embeddings) {
            entries.push((doc.clone(), emb.clone()));
        }
        docs.len()
    }

    pub async fn query(&self, embedding: &[f32], k: usize) -> Vec<ScoredDocument> {
        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|(doc, emb)| ScoredDocument {
                document: doc.clone(),
                score: cosine_similarity(embedding, emb),
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_closest_first() {
        let store = MemoryStore::default();
        store
            .upsert(
                &[Document::new("x-axis"), Document::new("y-axis"), Document::new("diag")],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
            )
            .await;
        let hits = store.query(&[1.0, 0.1], 2).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.page_content, "x-axis");
        assert_eq!(hits[1].document.page_content, "diag");
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = MemoryStore::default();
        assert!(store.query(&[1.0], 3).await.is_empty());
    }
}
