//! Vector index abstraction
//!
//! The index is a derived, rebuildable projection of the chunk rows in the
//! relational store, keyed by chunk identity. Upserts are idempotent;
//! replaying the same chunk through the same embedder overwrites an entry
//! with identical content. Backends: Qdrant for real deployments, an
//! in-memory implementation for tests and offline use.

mod memory;
mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload stored with each chunk in the index: the minimal denormalized
/// fields needed to render a citation without a relational lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub workspace_id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub text_hash: String,
    pub page_start: i64,
}

/// An entry ready to be upserted
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: Uuid,
    pub embedding: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A scored query hit
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Workspace/document scope restriction for queries and clears
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub workspace_id: Option<String>,
    pub doc_id: Option<String>,
}

impl ScopeFilter {
    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            doc_id: None,
        }
    }

    pub fn document(workspace_id: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            doc_id: Some(doc_id.into()),
        }
    }

    /// Whether a payload falls inside this scope
    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        if let Some(ref ws) = self.workspace_id {
            if &payload.workspace_id != ws {
                return false;
            }
        }
        if let Some(ref doc) = self.doc_id {
            if &payload.doc_id != doc {
                return false;
            }
        }
        true
    }
}

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent upsert keyed by chunk id
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Top-k cosine similarity query within a scope
    async fn query(
        &self,
        embedding: &[f32],
        scope: &ScopeFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Delete entries by chunk id
    async fn delete(&self, chunk_ids: &[Uuid]) -> Result<()>;

    /// Whether an entry exists for the chunk id
    async fn contains(&self, chunk_id: &Uuid) -> Result<bool>;

    /// Remove every entry in the scope (rebuild preamble)
    async fn clear(&self, scope: &ScopeFilter) -> Result<()>;

    /// Total entry count
    async fn count(&self) -> Result<usize>;
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
