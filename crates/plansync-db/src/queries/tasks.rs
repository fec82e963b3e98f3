//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};

use crate::models::TaskRow;

/// Parameters for inserting a task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub phase: String,
    pub level: i32,
    pub priority: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dependencies_json: serde_json::Value,
}

/// Delete every task of a plan. Returns the number of rows removed.
pub async fn delete_tasks_for_plan<'e, E>(executor: E, plan_id: &str) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM tasks WHERE plan_id = $1")
        .bind(plan_id)
        .execute(executor)
        .await
        .with_context(|| format!("failed to delete tasks of plan {plan_id}"))?;

    Ok(result.rows_affected())
}

/// Insert one task row at `position` within its plan.
pub async fn insert_task<'e, E>(
    executor: E,
    plan_id: &str,
    position: i32,
    task: &NewTask,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO tasks \
           (id, plan_id, position, title, description, status, phase, level, priority, \
            completed, created_at, updated_at, dependencies_json) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&task.id)
    .bind(plan_id)
    .bind(position)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.status)
    .bind(&task.phase)
    .bind(task.level)
    .bind(&task.priority)
    .bind(task.completed)
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(&task.dependencies_json)
    .execute(executor)
    .await
    .with_context(|| format!("failed to insert task {:?} of plan {plan_id}", task.id))?;

    Ok(())
}

/// List all tasks of a plan in their stored order.
pub async fn list_tasks_for_plan(pool: &PgPool, plan_id: &str) -> Result<Vec<TaskRow>> {
    let tasks = sqlx::query_as::<_, TaskRow>(
        "SELECT * FROM tasks WHERE plan_id = $1 ORDER BY position ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list tasks for plan {plan_id}"))?;

    Ok(tasks)
}
