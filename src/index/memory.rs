//! In-memory vector index
//!
//! Same contract as the Qdrant backend, held in a process-local map. Used by
//! the test suite and for fully offline operation.

use super::{cosine_similarity, ChunkPayload, IndexEntry, ScopeFilter, ScoredChunk, VectorIndex};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<Uuid, (Vec<f32>, ChunkPayload)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, sorted by chunk id. Test helper for
    /// comparing index states after a rebuild
    pub fn snapshot(&self) -> Vec<(Uuid, Vec<f32>, ChunkPayload)> {
        let entries = self.entries.read().expect("index lock poisoned");
        let mut all: Vec<_> = entries
            .iter()
            .map(|(id, (vec, payload))| (*id, vec.clone(), payload.clone()))
            .collect();
        all.sort_by_key(|(id, _, _)| *id);
        all
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, new_entries: Vec<IndexEntry>) -> Result<()> {
        let mut entries = self.entries.write().expect("index lock poisoned");
        for entry in new_entries {
            entries.insert(entry.chunk_id, (entry.embedding, entry.payload));
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        scope: &ScopeFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries.read().expect("index lock poisoned");

        let mut hits: Vec<ScoredChunk> = entries
            .iter()
            .filter(|(_, (_, payload))| scope.matches(payload))
            .map(|(id, (vec, payload))| ScoredChunk {
                chunk_id: *id,
                score: cosine_similarity(embedding, vec),
                payload: payload.clone(),
            })
            .collect();

        // Score descending; chunk id as a deterministic tie-break
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, chunk_ids: &[Uuid]) -> Result<()> {
        let mut entries = self.entries.write().expect("index lock poisoned");
        for id in chunk_ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn contains(&self, chunk_id: &Uuid) -> Result<bool> {
        let entries = self.entries.read().expect("index lock poisoned");
        Ok(entries.contains_key(chunk_id))
    }

    async fn clear(&self, scope: &ScopeFilter) -> Result<()> {
        let mut entries = self.entries.write().expect("index lock poisoned");
        entries.retain(|_, (_, payload)| !scope.matches(payload));
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let entries = self.entries.read().expect("index lock poisoned");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u128, ws: &str, doc: &str, vec: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: Uuid::from_u128(id),
            embedding: vec,
            payload: ChunkPayload {
                workspace_id: ws.to_string(),
                doc_id: doc.to_string(),
                chunk_index: 0,
                text_hash: "h".to_string(),
                page_start: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = MemoryIndex::new();
        let e = entry(1, "ws", "doc", vec![1.0, 0.0]);

        index.upsert(vec![e.clone()]).await.unwrap();
        index.upsert(vec![e]).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        assert!(index.contains(&Uuid::from_u128(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_ranks_and_scopes() {
        let index = MemoryIndex::new();
        index
            .upsert(vec![
                entry(1, "ws1", "doc1", vec![1.0, 0.0]),
                entry(2, "ws1", "doc1", vec![0.7, 0.7]),
                entry(3, "ws2", "doc9", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index
            .query(&[1.0, 0.0], &ScopeFilter::workspace("ws1"), 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, Uuid::from_u128(1));
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_scoped_clear() {
        let index = MemoryIndex::new();
        index
            .upsert(vec![
                entry(1, "ws1", "doc1", vec![1.0]),
                entry(2, "ws2", "doc2", vec![1.0]),
            ])
            .await
            .unwrap();

        index.clear(&ScopeFilter::workspace("ws1")).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        assert!(!index.contains(&Uuid::from_u128(1)).await.unwrap());
        assert!(index.contains(&Uuid::from_u128(2)).await.unwrap());
    }
}
