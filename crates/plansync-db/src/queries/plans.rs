//! Database query functions for the `plans` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};

use crate::models::PlanRow;

/// Parameters for inserting or replacing a plan row.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub id: String,
    pub title: String,
    pub version: String,
    pub file_path: String,
    pub description: String,
    pub progression: f64,
    pub task_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata_json: serde_json::Value,
}

/// Insert a plan row, or overwrite the mutable columns of an existing row
/// with the same id. `created_at` of an existing row is preserved.
pub async fn upsert_plan<'e, E>(executor: E, plan: &NewPlan) -> Result<PlanRow>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, PlanRow>(
        "INSERT INTO plans \
           (id, title, version, file_path, description, progression, task_count, \
            created_at, updated_at, metadata_json) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (id) DO UPDATE SET \
           title = EXCLUDED.title, \
           version = EXCLUDED.version, \
           file_path = EXCLUDED.file_path, \
           description = EXCLUDED.description, \
           progression = EXCLUDED.progression, \
           task_count = EXCLUDED.task_count, \
           updated_at = EXCLUDED.updated_at, \
           metadata_json = EXCLUDED.metadata_json \
         RETURNING *",
    )
    .bind(&plan.id)
    .bind(&plan.title)
    .bind(&plan.version)
    .bind(&plan.file_path)
    .bind(&plan.description)
    .bind(plan.progression)
    .bind(plan.task_count)
    .bind(plan.created_at)
    .bind(plan.updated_at)
    .bind(&plan.metadata_json)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to upsert plan {}", plan.id))?;

    Ok(row)
}

/// Fetch a plan by its ID.
pub async fn get_plan(pool: &PgPool, id: &str) -> Result<Option<PlanRow>> {
    let plan = sqlx::query_as::<_, PlanRow>("SELECT * FROM plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch plan {id}"))?;

    Ok(plan)
}

/// List the ids of every stored plan, most recently updated first.
pub async fn list_plan_ids(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM plans ORDER BY updated_at DESC, id ASC")
            .fetch_all(pool)
            .await
            .context("failed to list plan ids")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Aggregate counts across all plans and tasks.
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct PlanTotals {
    pub total_plans: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub average_progression: f64,
}

/// Compute [`PlanTotals`] in a single round trip.
pub async fn plan_totals(pool: &PgPool) -> Result<PlanTotals> {
    let totals = sqlx::query_as::<_, PlanTotals>(
        "SELECT \
           (SELECT COUNT(*) FROM plans) AS total_plans, \
           (SELECT COUNT(*) FROM tasks) AS total_tasks, \
           (SELECT COUNT(*) FROM tasks WHERE completed) AS completed_tasks, \
           COALESCE((SELECT AVG(progression) FROM plans), 0)::float8 AS average_progression",
    )
    .fetch_one(pool)
    .await
    .context("failed to compute plan totals")?;

    Ok(totals)
}
