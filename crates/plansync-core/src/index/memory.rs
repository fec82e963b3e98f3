//! Brute-force in-process [`VectorIndex`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    IndexError, PlanPayload, ScoredPlanRef, VectorIndex, check_dimension, check_plan_vector,
    cosine_similarity,
};
use crate::model::Plan;

#[derive(Default)]
pub struct MemoryVectorIndex {
    points: RwLock<BTreeMap<String, (Vec<f32>, PlanPayload)>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn store_plan_embeddings(&self, plan: &Plan) -> Result<(), IndexError> {
        check_plan_vector(plan)?;
        self.points.write().await.insert(
            plan.id.clone(),
            (plan.embeddings.clone(), PlanPayload::from_plan(plan)),
        );
        Ok(())
    }

    async fn search_similar_plans(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPlanRef>, IndexError> {
        check_dimension(vector)?;
        let points = self.points.read().await;
        let mut hits: Vec<ScoredPlanRef> = points
            .iter()
            .map(|(id, (v, payload))| ScoredPlanRef {
                plan_id: id.clone(),
                score: cosine_similarity(vector, v),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.plan_id.cmp(&b.plan_id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EMBEDDING_DIM;
    use crate::model::fixtures::{plan, task};

    fn unit(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[i] = 1.0;
        v
    }

    #[tokio::test]
    async fn refuses_empty_embeddings() {
        let index = MemoryVectorIndex::new();
        let p = plan("plan-1", vec![task("a", "A", "pending", "")]);
        let err = index.store_plan_embeddings(&p).await.unwrap_err();
        assert!(matches!(err, IndexError::MissingEmbeddings(id) if id == "plan-1"));
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_limits() {
        let index = MemoryVectorIndex::new();
        for (id, axis) in [("plan-x", 0), ("plan-y", 1), ("plan-z", 2)] {
            let mut p = plan(id, vec![task("a", "A", "pending", "")]);
            p.embeddings = unit(axis);
            index.store_plan_embeddings(&p).await.unwrap();
        }

        let mut query = unit(1);
        query[0] = 0.5;
        let hits = index.search_similar_plans(&query, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].plan_id, "plan-y");
        assert_eq!(hits[1].plan_id, "plan-x");
        assert_eq!(hits[0].payload.task_count, 1);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn search_rejects_wrong_dimension() {
        let index = MemoryVectorIndex::new();
        let err = index.search_similar_plans(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { actual: 2, .. }));
    }
}
