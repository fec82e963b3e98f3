//! Postgres-backed [`PlanStore`].

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};

use plansync_db::models::{PlanRow, SyncOperation, TaskRow};
use plansync_db::pool;
use plansync_db::queries::plans::{self, NewPlan};
use plansync_db::queries::sync_logs::{self, NewSyncLog};
use plansync_db::queries::tasks::{self, NewTask};

use super::{OperationLog, PlanStore, StoreError, SyncStats};
use crate::model::{Plan, PlanMetadata, Task};

/// Plan fields without a dedicated column, kept in `plans.metadata_json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PlanExtras {
    #[serde(default)]
    date: String,
    #[serde(default)]
    embeddings: Vec<f32>,
}

/// [`PlanStore`] over a `sqlx` connection pool.
#[derive(Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn save_inner(&self, plan: &Plan) -> Result<()> {
        let new_plan = new_plan(plan)?;
        let new_tasks = plan
            .tasks
            .iter()
            .map(new_task)
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        plans::upsert_plan(&mut *tx, &new_plan).await?;
        let removed = tasks::delete_tasks_for_plan(&mut *tx, &plan.id).await?;
        for (position, task) in new_tasks.iter().enumerate() {
            let position = i32::try_from(position).context("task position overflows i32")?;
            tasks::insert_task(&mut *tx, &plan.id, position, task).await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("failed to commit plan {}", plan.id))?;

        debug!(
            plan_id = %plan.id,
            tasks = new_tasks.len(),
            replaced = removed,
            "stored plan"
        );
        Ok(())
    }

    async fn load_inner(&self, id: &str) -> Result<Plan, StoreError> {
        let row = plans::get_plan(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        let task_rows = tasks::list_tasks_for_plan(&self.pool, id).await?;
        Ok(plan_from_rows(row, task_rows)?)
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    fn name(&self) -> &str {
        "postgres"
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
        Ok(result?)
    }

    async fn load(&self, id: &str) -> Result<Plan, StoreError> {
        let started = Instant::now();
        let result = self.load_inner(id).await;
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
        Ok(plans::list_plan_ids(&self.pool).await?)
    }

    async fn stats(&self) -> Result<SyncStats, StoreError> {
        let totals = plans::plan_totals(&self.pool).await?;
        let since = Utc::now() - chrono::Duration::hours(24);
        let (operations, errors) = sync_logs::count_logs_since(&self.pool, since).await?;
        let last_sync_at = sync_logs::last_success_at(&self.pool).await?;

        Ok(SyncStats {
            total_plans: totals.total_plans,
            total_tasks: totals.total_tasks,
            completed_tasks: totals.completed_tasks,
            average_progression: totals.average_progression,
            operations_last_24h: operations,
            errors_last_24h: errors,
            last_sync_at,
        })
    }

    async fn health(&self) -> Result<(), StoreError> {
        Ok(pool::ping(&self.pool).await?)
    }

    async fn log_operation(&self, entry: OperationLog) {
        let new = NewSyncLog {
            plan_id: entry.plan_id,
            operation: entry.operation,
            status: entry.status,
            message: entry.message,
            execution_time_ms: i64::try_from(entry.elapsed.as_millis()).unwrap_or(i64::MAX),
        };
        if let Err(e) = sync_logs::insert_sync_log(&self.pool, &new).await {
            warn!(plan_id = %new.plan_id, operation = %new.operation, "failed to write sync log: {e:#}");
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn new_plan(plan: &Plan) -> Result<NewPlan> {
    let extras = PlanExtras {
        date: plan.metadata.date.clone(),
        embeddings: plan.embeddings.clone(),
    };
    Ok(NewPlan {
        id: plan.id.clone(),
        title: plan.metadata.title.clone(),
        version: plan.metadata.version.clone(),
        file_path: plan.metadata.file_path.clone(),
        description: plan.metadata.description.clone(),
        progression: plan.metadata.progression,
        task_count: i32::try_from(plan.tasks.len()).context("task count overflows i32")?,
        created_at: plan.created_at,
        updated_at: plan.updated_at,
        metadata_json: serde_json::to_value(&extras).context("failed to encode plan metadata")?,
    })
}

fn new_task(task: &Task) -> Result<NewTask> {
    Ok(NewTask {
        id: task.id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        status: task.status.clone(),
        phase: task.phase.clone(),
        level: i32::try_from(task.level)
            .with_context(|| format!("task {} level out of range", task.id))?,
        priority: task.priority.clone(),
        completed: task.completed,
        created_at: task.created_at,
        updated_at: task.updated_at,
        dependencies_json: serde_json::to_value(&task.dependencies)
            .context("failed to encode task dependencies")?,
    })
}

fn plan_from_rows(row: PlanRow, task_rows: Vec<TaskRow>) -> Result<Plan> {
    let extras: PlanExtras = if row.metadata_json.is_null() {
        PlanExtras::default()
    } else {
        serde_json::from_value(row.metadata_json)
            .with_context(|| format!("corrupt metadata_json for plan {}", row.id))?
    };

    let tasks = task_rows
        .into_iter()
        .map(|t| {
            let dependencies = serde_json::from_value(t.dependencies_json)
                .with_context(|| format!("corrupt dependencies_json for task {}", t.id))?;
            Ok(Task {
                level: u32::try_from(t.level)
                    .with_context(|| format!("task {} has negative level", t.id))?,
                id: t.id,
                title: t.title,
                description: t.description,
                status: t.status,
                phase: t.phase,
                priority: t.priority,
                completed: t.completed,
                dependencies,
                created_at: t.created_at,
                updated_at: t.updated_at,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Plan {
        id: row.id,
        metadata: PlanMetadata {
            title: row.title,
            version: row.version,
            date: extras.date,
            description: row.description,
            progression: row.progression,
            file_path: row.file_path,
        },
        tasks,
        embeddings: extras.embeddings,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
