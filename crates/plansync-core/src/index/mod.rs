//! Semantic search over plan embeddings.
//!
//! The vector index is an optional companion of the plan store: failures
//! here degrade search but never block storing a plan.

mod memory;
mod qdrant;

pub use memory::MemoryVectorIndex;
pub use qdrant::QdrantIndex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{EMBEDDING_DIM, Plan};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("plan {0} has no embeddings to index")]
    MissingEmbeddings(String),

    #[error("vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector index rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Plan summary stored next to each vector so search results can be shown
/// without a store round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPayload {
    pub plan_id: String,
    pub title: String,
    pub version: String,
    pub task_count: usize,
    pub progression: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanPayload {
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            plan_id: plan.id.clone(),
            title: plan.metadata.title.clone(),
            version: plan.metadata.version.clone(),
            task_count: plan.tasks.len(),
            progression: plan.metadata.progression,
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}

/// One search hit. `score` is backend-defined; higher is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPlanRef {
    pub plan_id: String,
    pub score: f32,
    pub payload: PlanPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Create the collection (384 dims, cosine) unless it already exists.
    async fn ensure_collection(&self) -> Result<(), IndexError>;

    /// Upsert the plan's vector and payload. Fails on empty embeddings.
    async fn store_plan_embeddings(&self, plan: &Plan) -> Result<(), IndexError>;

    /// At most `limit` hits, best first.
    async fn search_similar_plans(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPlanRef>, IndexError>;

    async fn health_check(&self) -> Result<(), IndexError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn VectorIndex) {}
};

/// Shared argument checks for [`VectorIndex::store_plan_embeddings`].
pub(crate) fn check_plan_vector(plan: &Plan) -> Result<(), IndexError> {
    if plan.embeddings.is_empty() {
        return Err(IndexError::MissingEmbeddings(plan.id.clone()));
    }
    check_dimension(&plan.embeddings)
}

pub(crate) fn check_dimension(vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != EMBEDDING_DIM {
        return Err(IndexError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Cosine similarity in `[-1, 1]`. Zero for mismatched lengths or a
/// zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
