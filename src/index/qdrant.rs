//! Qdrant-backed vector index

use super::{ChunkPayload, IndexEntry, ScopeFilter, ScoredChunk, VectorIndex};
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder,
    PointId, PointStruct, ScalarQuantizationBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Qdrant index handle
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Create a new index connection
    pub async fn new(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Index(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    /// Ensure the collection exists with correct configuration
    pub async fn ensure_collection(&self) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await?;

        if exists {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        let vectors_config = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(vectors_config)
                    .quantization_config(ScalarQuantizationBuilder::default()),
            )
            .await?;

        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn scope_to_filter(scope: &ScopeFilter) -> Option<Filter> {
        let mut must: Vec<Condition> = Vec::new();

        if let Some(ref ws) = scope.workspace_id {
            must.push(Condition::matches("workspace_id", ws.clone()));
        }
        if let Some(ref doc) = scope.doc_id {
            must.push(Condition::matches("doc_id", doc.clone()));
        }

        if must.is_empty() {
            return None;
        }

        Some(Filter {
            must,
            should: vec![],
            must_not: vec![],
            min_should: None,
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        debug!(
            "Upserting {} points to collection {}",
            entries.len(),
            self.collection
        );

        let points: Vec<PointStruct> = entries
            .into_iter()
            .map(|e| {
                PointStruct::new(
                    e.chunk_id.to_string(),
                    e.embedding,
                    payload_to_qdrant(&e.payload),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await?;

        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        scope: &ScopeFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        debug!(
            "Searching collection {} with limit {}",
            self.collection, k
        );

        let mut search_builder =
            SearchPointsBuilder::new(&self.collection, embedding.to_vec(), k as u64)
                .with_payload(true);

        if let Some(filter) = Self::scope_to_filter(scope) {
            search_builder = search_builder.filter(filter);
        }

        let response = self.client.search_points(search_builder).await?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let chunk_id = point
                .id
                .as_ref()
                .and_then(point_id_to_uuid)
                .ok_or_else(|| Error::Index("point without UUID identity".to_string()))?;

            let json: serde_json::Map<String, Value> = point
                .payload
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect();
            let payload: ChunkPayload = serde_json::from_value(Value::Object(json))
                .map_err(|e| Error::Index(format!("malformed point payload: {}", e)))?;

            hits.push(ScoredChunk {
                chunk_id,
                score: point.score,
                payload,
            });
        }

        Ok(hits)
    }

    async fn delete(&self, chunk_ids: &[Uuid]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<PointId> = chunk_ids
            .iter()
            .map(|id| PointId::from(id.to_string()))
            .collect();

        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(ids))
            .await?;

        Ok(())
    }

    async fn contains(&self, chunk_id: &Uuid) -> Result<bool> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(
                    &self.collection,
                    vec![PointId::from(chunk_id.to_string())],
                )
                .with_payload(false)
                .with_vectors(false),
            )
            .await?;

        Ok(!response.result.is_empty())
    }

    async fn clear(&self, scope: &ScopeFilter) -> Result<()> {
        match Self::scope_to_filter(scope) {
            Some(filter) => {
                self.client
                    .delete_points(DeletePointsBuilder::new(&self.collection).points(filter))
                    .await?;
            }
            None => {
                // Unscoped clear: drop and recreate the collection
                if self.client.collection_exists(&self.collection).await? {
                    info!("Deleting collection {}", self.collection);
                    self.client.delete_collection(&self.collection).await?;
                }
                self.ensure_collection().await?;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let info = self.client.collection_info(&self.collection).await?;
        let count = info
            .result
            .map(|r| r.points_count.unwrap_or(0))
            .unwrap_or(0);
        Ok(count as usize)
    }
}

/// Convert payload to Qdrant's map format
fn payload_to_qdrant(payload: &ChunkPayload) -> HashMap<String, QdrantValue> {
    use qdrant_client::qdrant::value::Kind;

    let string = |s: &str| QdrantValue {
        kind: Some(Kind::StringValue(s.to_string())),
    };
    let int = |i: i64| QdrantValue {
        kind: Some(Kind::IntegerValue(i)),
    };

    let mut map = HashMap::new();
    map.insert("workspace_id".to_string(), string(&payload.workspace_id));
    map.insert("doc_id".to_string(), string(&payload.doc_id));
    map.insert("chunk_index".to_string(), int(payload.chunk_index));
    map.insert("text_hash".to_string(), string(&payload.text_hash));
    map.insert("page_start".to_string(), int(payload.page_start));
    map
}

/// Convert PointId to UUID
fn point_id_to_uuid(id: &PointId) -> Option<Uuid> {
    match &id.point_id_options {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid_str)) => {
            Uuid::try_parse(uuid_str).ok()
        }
        _ => None,
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: QdrantValue) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_to_filter() {
        assert!(QdrantIndex::scope_to_filter(&ScopeFilter::default()).is_none());

        let filter =
            QdrantIndex::scope_to_filter(&ScopeFilter::document("ws1", "doc1")).unwrap();
        assert_eq!(filter.must.len(), 2);

        let filter = QdrantIndex::scope_to_filter(&ScopeFilter::workspace("ws1")).unwrap();
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn test_payload_roundtrip_through_json() {
        let payload = ChunkPayload {
            workspace_id: "ws1".to_string(),
            doc_id: "doc1".to_string(),
            chunk_index: 4,
            text_hash: "abc123".to_string(),
            page_start: 7,
        };

        let map = payload_to_qdrant(&payload);
        let json: serde_json::Map<String, Value> = map
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect();
        let parsed: ChunkPayload = serde_json::from_value(Value::Object(json)).unwrap();

        assert_eq!(parsed, payload);
    }
}
