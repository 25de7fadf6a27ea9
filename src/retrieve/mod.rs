//! Retrieval planning
//!
//! Decides what evidence an answer may use. A user selection always wins:
//! when selection text is present the vector index is never queried.
//! Otherwise the question is embedded and searched within the caller's
//! workspace/document scope, hits below the score floor are dropped, and the
//! survivors are hydrated from the relational store. The store is the source
//! of truth; an index hit whose chunk row is gone or has changed is stale and
//! silently discarded.

use crate::config::RetrievalConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::index::{ScopeFilter, VectorIndex};
use crate::meta::MetaDb;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Text the user explicitly selected as the grounding for a question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub text: String,
    pub doc_id: Option<String>,
    pub page: Option<i64>,
}

/// A retrieved chunk hydrated from the relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub page_start: i64,
    pub page_end: i64,
    pub score: f32,
    pub text: String,
}

/// The evidence context an answer is grounded in. Persisted verbatim as the
/// message's context snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrievalContext {
    Selection {
        text: String,
        doc_id: Option<String>,
        page: Option<i64>,
    },
    VectorSearch {
        hits: Vec<RetrievedChunk>,
    },
    Empty,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        matches!(self, RetrievalContext::Empty)
    }
}

/// Plans the evidence for a question
pub struct RetrievalPlanner {
    db: MetaDb,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl RetrievalPlanner {
    pub fn new(
        db: MetaDb,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            index,
            config,
        }
    }

    /// Build the retrieval context for a question
    pub async fn plan(
        &self,
        question: &str,
        selection: Option<&Selection>,
        scope: &ScopeFilter,
    ) -> Result<RetrievalContext> {
        if let Some(sel) = selection {
            if !sel.text.trim().is_empty() {
                debug!("Using user selection, skipping search");
                return Ok(RetrievalContext::Selection {
                    text: sel.text.clone(),
                    doc_id: sel.doc_id.clone(),
                    page: sel.page,
                });
            }
        }

        if question.trim().is_empty() {
            return Err(Error::Config("question must not be empty".to_string()));
        }

        let embeddings = self.embedder.embed(vec![question.to_string()]).await?;
        let query = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("embedder returned no vector".to_string()))?;

        let scored = self.index.query(&query, scope, self.config.top_k).await?;
        debug!(hits = scored.len(), "Raw search hits");

        let mut hits = Vec::with_capacity(scored.len());
        for hit in scored {
            if hit.score < self.config.min_score {
                continue;
            }

            let chunk_id = hit.chunk_id.to_string();
            let Some(row) = self.db.get_chunk(&chunk_id).await? else {
                debug!(chunk_id = %chunk_id, "Dropping stale hit: chunk row gone");
                continue;
            };
            if row.text_hash != hit.payload.text_hash {
                debug!(chunk_id = %chunk_id, "Dropping stale hit: chunk text changed");
                continue;
            }

            hits.push(RetrievedChunk {
                chunk_id,
                doc_id: row.doc_id,
                chunk_index: row.chunk_index,
                page_start: row.page_start,
                page_end: row.page_end,
                score: hit.score,
                text: row.text,
            });
        }

        if hits.is_empty() {
            Ok(RetrievalContext::Empty)
        } else {
            Ok(RetrievalContext::VectorSearch { hits })
        }
    }
}
