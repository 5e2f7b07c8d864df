use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uwchat_core::{Citation, CitationMeta};
use uwchat_error::Result;

/// Number of nearest neighbors fetched per query.
pub const TOP_K: usize = 5;

/// A chunk staged for upsert, together with its payload metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub text: String,
    pub file_name: String,
    pub ingested_at: String,
}

/// One retrieval hit, descending-similarity ordered by the index.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub citation: Citation,
    pub score: f32,
}

/// Nearest-neighbor index over embedded chunks.
///
/// `query` returning an empty vec is the explicit no-matches condition;
/// transport failures surface as `Err`. Results never invent chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: &[(ChunkRecord, Vec<f32>)]) -> Result<()>;
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    let len = a.len().min(b.len());
    for i in 0..len {
        dot_product += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory index for local development and tests. Cosine similarity over
/// a flat list, same retrieval contract as the Qdrant implementation.
#[derive(Default)]
pub struct MemoryVectorIndex {
    records: Arc<RwLock<Vec<(ChunkRecord, Vec<f32>)>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, records: &[(ChunkRecord, Vec<f32>)]) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.extend_from_slice(records);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let guard = self.records.read().await;
        let mut scored: Vec<ScoredChunk> = guard
            .iter()
            .map(|(record, embedding)| ScoredChunk {
                citation: Citation {
                    text: record.text.clone(),
                    chunk_id: record.chunk_id.clone(),
                    metadata: CitationMeta {
                        file_name: Some(record.file_name.clone()),
                        ingested_at: Some(record.ingested_at.clone()),
                    },
                },
                score: cosine_similarity(vector, embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            text: text.to_string(),
            file_name: "campus.txt".to_string(),
            ingested_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn query_on_empty_index_reports_no_matches() {
        let index = MemoryVectorIndex::new();
        let hits = index.query(&[1.0, 0.0], TOP_K).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn hits_are_ordered_by_descending_similarity() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(&[
                (record("a", "far"), vec![0.0, 1.0]),
                (record("b", "near"), vec![1.0, 0.0]),
                (record("c", "mid"), vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], TOP_K).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].citation.chunk_id, "b");
        assert_eq!(hits[1].citation.chunk_id, "c");
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[tokio::test]
    async fn results_are_capped_at_top_k() {
        let index = MemoryVectorIndex::new();
        let records: Vec<_> = (0..10)
            .map(|i| (record(&format!("c{}", i), "text"), vec![1.0, i as f32]))
            .collect();
        index.upsert(&records).await.unwrap();

        let hits = index.query(&[1.0, 0.0], TOP_K).await.unwrap();
        assert_eq!(hits.len(), TOP_K);
    }

    #[test]
    fn cosine_similarity_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
