//! Collection-scoped vector storage.
//!
//! [`VectorStore`] binds a [`VectorDb`] to one collection and enforces
//! the dimension invariant: every vector must match the configured
//! collection size, checked on the whole batch before any network call
//! so a bad batch is rejected without partial application.

use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::VectorDbConfig;
use crate::models::{ScoredPoint, VectorPoint};
use crate::vector_db::{PointQuery, VectorDb};

pub struct VectorStore {
    db: Arc<dyn VectorDb>,
    collection: String,
    vector_size: usize,
    batch_size: usize,
}

impl VectorStore {
    pub fn new(db: Arc<dyn VectorDb>, config: &VectorDbConfig) -> Self {
        Self {
            db,
            collection: config.collection.clone(),
            vector_size: config.vector_size,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// Create the collection when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        if !self.db.collection_exists(&self.collection).await? {
            info!(collection = %self.collection, size = self.vector_size, "creating collection");
            self.db
                .create_collection(&self.collection, self.vector_size)
                .await?;
        }
        Ok(())
    }

    fn check_dimensions(&self, points: &[VectorPoint]) -> Result<()> {
        for point in points {
            if point.vector.len() != self.vector_size {
                bail!(
                    "vector dimension mismatch for point {}: got {}, collection expects {}",
                    point.id,
                    point.vector.len(),
                    self.vector_size
                );
            }
        }
        Ok(())
    }

    /// Upsert a single point, refreshing its `updated_at` stamp.
    pub async fn upsert(&self, mut point: VectorPoint) -> Result<()> {
        self.check_dimensions(std::slice::from_ref(&point))?;
        point.payload.updated_at = Utc::now();
        self.db.upsert_points(&self.collection, &[point]).await
    }

    /// Upsert many points in sub-batches. The whole call is rejected
    /// before any network traffic if any vector has the wrong
    /// dimension.
    pub async fn batch_upsert(&self, mut points: Vec<VectorPoint>) -> Result<usize> {
        self.check_dimensions(&points)?;
        let now = Utc::now();
        for point in &mut points {
            point.payload.updated_at = now;
        }

        let total = points.len();
        let mut stored = 0usize;
        for batch in points.chunks(self.batch_size) {
            self.db.upsert_points(&self.collection, batch).await?;
            stored += batch.len();
            debug!(
                collection = %self.collection,
                stored,
                total,
                "upsert progress"
            );
        }
        Ok(stored)
    }

    pub async fn get_point(&self, id: &str) -> Result<Option<VectorPoint>> {
        self.db.retrieve_point(&self.collection, id).await
    }

    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        self.db.delete_points(&self.collection, ids).await
    }

    pub async fn search(&self, vector: &[f32], query: &PointQuery) -> Result<Vec<ScoredPoint>> {
        if vector.len() != self.vector_size {
            bail!(
                "query vector dimension mismatch: got {}, collection expects {}",
                vector.len(),
                self.vector_size
            );
        }
        self.db.search_points(&self.collection, vector, query).await
    }

    pub async fn recommend(&self, positive_id: &str, query: &PointQuery) -> Result<Vec<ScoredPoint>> {
        self.db
            .recommend_points(&self.collection, positive_id, query)
            .await
    }

    /// Drop and recreate the collection, discarding every stored point.
    pub async fn clear(&self) -> Result<()> {
        info!(collection = %self.collection, "clearing collection");
        self.db.delete_collection(&self.collection).await?;
        self.db
            .create_collection(&self.collection, self.vector_size)
            .await
    }

    /// Drop the collection entirely.
    pub async fn drop_collection(&self) -> Result<()> {
        self.db.delete_collection(&self.collection).await
    }
}
