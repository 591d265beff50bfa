//! In-process vector index with exact cosine search.
//!
//! Backs `vector.backend = "memory"` for local runs without Qdrant and the
//! integration tests. Contents are lost on restart.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::filter::{Metadata, MetadataFilter};
use super::records::CollectionKind;
use super::vector_store::{check_dimension, IndexHit, IndexPoint, VectorIndex};
use crate::error::VectorStoreError;

#[derive(Debug, Clone)]
struct StoredPoint {
    document: String,
    vector: Vec<f32>,
    metadata: Metadata,
}

pub struct MemoryIndex {
    dimension: usize,
    collections: RwLock<HashMap<CollectionKind, HashMap<String, StoredPoint>>>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

/// `1 - cos(a, b)`; a zero vector is orthogonal to everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(
        &self,
        kind: CollectionKind,
        points: Vec<IndexPoint>,
    ) -> Result<Vec<String>, VectorStoreError> {
        for point in &points {
            check_dimension(self.dimension, &point.vector)?;
        }

        let mut collections = self.collections.write().await;
        let collection = collections.entry(kind).or_default();
        let ids = points
            .into_iter()
            .map(|point| {
                let id = point.id.unwrap_or_else(|| Uuid::new_v4().to_string());
                collection.insert(
                    id.clone(),
                    StoredPoint {
                        document: point.document,
                        vector: point.vector,
                        metadata: point.metadata,
                    },
                );
                id
            })
            .collect();
        Ok(ids)
    }

    async fn query(
        &self,
        kind: CollectionKind,
        vector: Vec<f32>,
        k: u64,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>, VectorStoreError> {
        filter.validate()?;
        check_dimension(self.dimension, &vector)?;

        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&kind) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<IndexHit> = collection
            .iter()
            .filter(|(_, point)| filter.matches(&point.metadata))
            .map(|(id, point)| IndexHit {
                id: id.clone(),
                distance: cosine_distance(&vector, &point.vector),
                document: point.document.clone(),
                metadata: point.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k as usize);
        Ok(hits)
    }

    async fn count(&self, kind: CollectionKind) -> Result<u64, VectorStoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(&kind).map_or(0, |c| c.len() as u64))
    }

    async fn clear(&self, kind: CollectionKind) -> Result<(), VectorStoreError> {
        self.collections.write().await.remove(&kind);
        Ok(())
    }
}
