//! Brute-force cosine similarity index with online insertion.
//!
//! Vectors are L2-normalized at insert so cosine similarity reduces to a
//! dot product. At the current scale a linear scan beats maintaining an
//! approximate structure; the interface leaves room for a periodic ANN
//! rebuild behind the same calls.

use chrono::{DateTime, Utc};
use quarry_protocol::types::SourceId;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: Uuid,
    pub source_id: SourceId,
    pub vector: Vec<f32>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: Uuid,
    pub source_id: SourceId,
    pub similarity: f32,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    entries: Vec<IndexEntry>,
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(
        &mut self,
        id: Uuid,
        source_id: SourceId,
        vector: Vec<f32>,
        extracted_at: DateTime<Utc>,
    ) {
        self.entries.push(IndexEntry {
            id,
            source_id,
            vector: normalize(vector),
            extracted_at,
        });
    }

    /// Top-K neighbors by cosine similarity, most similar first.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if query.is_empty() || k == 0 {
            return Vec::new();
        }
        let query = normalize(query.to_vec());
        let mut neighbors: Vec<Neighbor> = self
            .entries
            .iter()
            .filter(|entry| entry.vector.len() == query.len())
            .map(|entry| Neighbor {
                id: entry.id,
                source_id: entry.source_id.clone(),
                similarity: dot(&entry.vector, &query),
                extracted_at: entry.extracted_at,
            })
            .collect();
        neighbors.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        neighbors.truncate(k);
        neighbors
    }
}
