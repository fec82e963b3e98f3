//! In-process [`PlanStore`].

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use plansync_db::models::{LogStatus, SyncOperation};

use super::{OperationLog, PlanStore, StoreError, SyncStats};
use crate::model::{self, Plan};

/// Audit entry kept by [`MemoryPlanStore`].
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub entry: OperationLog,
    pub at: DateTime<Utc>,
}

/// Plans held in a map, with the same overwrite and audit semantics as
/// the Postgres backend (including the unique `file_path`).
#[derive(Default)]
pub struct MemoryPlanStore {
    plans: RwLock<BTreeMap<String, Plan>>,
    log: Mutex<Vec<OperationRecord>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit log, oldest first.
    pub async fn operations(&self) -> Vec<OperationRecord> {
        self.log.lock().await.clone()
    }

    async fn save_inner(&self, plan: &Plan) -> Result<(), StoreError> {
        let mut plans = self.plans.write().await;

        if let Some(other) = plans
            .values()
            .find(|p| p.id != plan.id && p.metadata.file_path == plan.metadata.file_path)
        {
            return Err(StoreError::Storage(anyhow!(
                "file_path {} already belongs to plan {}",
                plan.metadata.file_path,
                other.id
            )));
        }

        let mut stored = plan.clone();
        if let Some(existing) = plans.get(&plan.id) {
            stored.created_at = existing.created_at;
        }
        plans.insert(stored.id.clone(), stored);
        Ok(())
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, plan: &Plan) -> Result<(), StoreError> {
        let started = Instant::now();
        let result = self.save_inner(plan).await;
        self.log_operation(OperationLog::from_result(
            &plan.id,
            SyncOperation::StorePlan,
            &result,
            started.elapsed(),
        ))
        .await;
        result
    }

    async fn load(&self, id: &str) -> Result<Plan, StoreError> {
        let started = Instant::now();
        let result = self
            .plans
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_owned()));
        self.log_operation(OperationLog::from_result(
            id,
            SyncOperation::GetPlan,
            &result,
            started.elapsed(),
        ))
        .await;
        result
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let plans = self.plans.read().await;
        let mut entries: Vec<(&String, DateTime<Utc>)> =
            plans.iter().map(|(id, p)| (id, p.updated_at)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(entries.into_iter().map(|(id, _)| id.clone()).collect())
    }

    async fn stats(&self) -> Result<SyncStats, StoreError> {
        let plans = self.plans.read().await;
        let log = self.log.lock().await;
        let since = model::now() - chrono::Duration::hours(24);

        let total_plans = plans.len() as i64;
        let average_progression = if plans.is_empty() {
            0.0
        } else {
            plans.values().map(|p| p.metadata.progression).sum::<f64>() / plans.len() as f64
        };
        let recent = log.iter().filter(|r| r.at >= since);

        Ok(SyncStats {
            total_plans,
            total_tasks: plans.values().map(|p| p.tasks.len() as i64).sum(),
            completed_tasks: plans.values().map(|p| p.completed_count() as i64).sum(),
            average_progression,
            operations_last_24h: recent.clone().count() as i64,
            errors_last_24h: recent
                .filter(|r| r.entry.status == LogStatus::Error)
                .count() as i64,
            last_sync_at: log
                .iter()
                .filter(|r| r.entry.status == LogStatus::Success)
                .map(|r| r.at)
                .max(),
        })
    }

    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn log_operation(&self, entry: OperationLog) {
        self.log.lock().await.push(OperationRecord {
            entry,
            at: model::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{plan, task};

    #[tokio::test]
    async fn save_then_load() {
        let store = MemoryPlanStore::new();
        let p = plan("plan-1", vec![task("a", "A", "pending", "")]);
        store.save(&p).await.unwrap();
        assert_eq!(store.load("plan-1").await.unwrap(), p);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_and_audited() {
        let store = MemoryPlanStore::new();
        let err = store.load("nope").await.unwrap_err();
        assert!(err.is_not_found());

        let ops = store.operations().await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].entry.operation, SyncOperation::GetPlan);
        assert_eq!(ops[0].entry.status, LogStatus::Error);
    }

    #[tokio::test]
    async fn resave_replaces_tasks_and_keeps_created_at() {
        let store = MemoryPlanStore::new();
        let original = plan("plan-1", vec![task("a", "A", "pending", "")]);
        store.save(&original).await.unwrap();

        let mut next = plan("plan-1", vec![task("b", "B", "completed", "")]);
        next.created_at = model::now();
        next.metadata.title = "Renamed".into();
        store.save(&next).await.unwrap();

        let loaded = store.load("plan-1").await.unwrap();
        assert_eq!(loaded.metadata.title, "Renamed");
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].id, "b");
        assert_eq!(loaded.created_at, original.created_at);
    }

    #[tokio::test]
    async fn file_path_is_unique() {
        let store = MemoryPlanStore::new();
        store
            .save(&plan("plan-1", vec![task("a", "A", "pending", "")]))
            .await
            .unwrap();
        let err = store
            .save(&plan("plan-2", vec![task("a", "A", "pending", "")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn stats_aggregate_plans_and_log() {
        let store = MemoryPlanStore::new();
        let mut p1 = plan(
            "plan-1",
            vec![task("a", "A", "completed", ""), task("b", "B", "pending", "")],
        );
        p1.metadata.progression = 50.0;
        let mut p2 = plan("plan-2", vec![task("c", "C", "pending", "")]);
        p2.metadata.file_path = "plans/other.md".into();
        p2.metadata.progression = 0.0;
        store.save(&p1).await.unwrap();
        store.save(&p2).await.unwrap();
        let _ = store.load("missing").await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_plans, 2);
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.average_progression, 25.0);
        assert_eq!(stats.operations_last_24h, 3);
        assert_eq!(stats.errors_last_24h, 1);
        assert!(stats.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn list_ids_newest_first() {
        let store = MemoryPlanStore::new();
        let mut old = plan("plan-old", vec![task("a", "A", "pending", "")]);
        old.metadata.file_path = "old.md".into();
        let mut new = plan("plan-new", vec![task("a", "A", "pending", "")]);
        new.metadata.file_path = "new.md".into();
        new.updated_at = model::now();
        store.save(&old).await.unwrap();
        store.save(&new).await.unwrap();

        assert_eq!(store.list_ids().await.unwrap(), vec!["plan-new", "plan-old"]);
    }
}
