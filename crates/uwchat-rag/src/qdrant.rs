use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, CreateCollectionBuilder, Distance, PointId, PointStruct,
    QueryPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;
use uwchat_core::{Citation, CitationMeta};
use uwchat_error::Result;

use crate::retrieve::{ChunkRecord, ScoredChunk, VectorIndex};

/// Qdrant-backed vector index. Point ids are fresh v4 UUIDs; the stable
/// chunk id lives in the payload alongside text and ingestion metadata.
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection_name: String,
}

impl QdrantVectorIndex {
    pub async fn new(qdrant_url: &str, collection_name: &str, vector_size: u64) -> Result<Self> {
        let client = Qdrant::from_url(qdrant_url).build()?;

        if !client.collection_exists(collection_name).await? {
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection_name).vectors_config(
                        VectorParamsBuilder::new(vector_size, Distance::Cosine).build(),
                    ),
                )
                .await?;
            info!(collection = collection_name, "created Qdrant collection");
        }

        Ok(Self {
            client,
            collection_name: collection_name.to_string(),
        })
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| match &v.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    })
}

fn point_id_string(id: Option<&PointId>) -> Option<String> {
    match id.and_then(|p| p.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(u)) => Some(u.clone()),
        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
        None => None,
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert(&self, records: &[(ChunkRecord, Vec<f32>)]) -> Result<()> {
        let points: Vec<PointStruct> = records
            .iter()
            .map(|(record, embedding)| {
                let mut payload = Payload::new();
                payload.insert("text", record.text.clone());
                payload.insert("chunkId", record.chunk_id.clone());
                payload.insert("fileName", record.file_name.clone());
                payload.insert("ingestedAt", record.ingested_at.clone());
                PointStruct::new(Uuid::new_v4().to_string(), embedding.clone(), payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(&self.collection_name)
                    .query(vector.to_vec())
                    .limit(top_k as u64)
                    .with_payload(true),
            )
            .await?;

        // Missing payload fields default to absent rather than failing.
        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let chunk_id = payload_str(&point.payload, "chunkId")
                    .or_else(|| point_id_string(point.id.as_ref()))
                    .unwrap_or_default();
                ScoredChunk {
                    citation: Citation {
                        text: payload_str(&point.payload, "text").unwrap_or_default(),
                        chunk_id,
                        metadata: CitationMeta {
                            file_name: payload_str(&point.payload, "fileName"),
                            ingested_at: payload_str(&point.payload, "ingestedAt"),
                        },
                    },
                    score: point.score,
                }
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_value(s: &str) -> Value {
        Value {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    #[test]
    fn payload_lookup_ignores_non_string_values() {
        let mut payload = HashMap::new();
        payload.insert("text".to_string(), string_value("chunk body"));
        payload.insert(
            "chunkId".to_string(),
            Value {
                kind: Some(Kind::IntegerValue(7)),
            },
        );
        assert_eq!(payload_str(&payload, "text").as_deref(), Some("chunk body"));
        assert_eq!(payload_str(&payload, "chunkId"), None);
        assert_eq!(payload_str(&payload, "fileName"), None);
    }

    #[test]
    fn point_id_falls_back_to_numeric_form() {
        let id = PointId {
            point_id_options: Some(PointIdOptions::Num(42)),
        };
        assert_eq!(point_id_string(Some(&id)).as_deref(), Some("42"));
        assert_eq!(point_id_string(None), None);
    }
}
