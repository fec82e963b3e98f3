//! Database query functions for the `sync_logs` audit table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{LogStatus, SyncLog, SyncOperation};

/// Parameters for inserting an audit row.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    /// Plan the operation targeted. Stored as NULL when no such plan exists.
    pub plan_id: String,
    pub operation: SyncOperation,
    pub status: LogStatus,
    pub message: String,
    pub execution_time_ms: i64,
}

/// Insert an audit row. Returns the inserted row with server-generated
/// defaults (id, created_at).
pub async fn insert_sync_log(pool: &PgPool, new: &NewSyncLog) -> Result<SyncLog> {
    let log = sqlx::query_as::<_, SyncLog>(
        "INSERT INTO sync_logs (plan_id, operation, status, message, execution_time_ms) \
         VALUES ((SELECT id FROM plans WHERE id = $1), $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(&new.plan_id)
    .bind(new.operation)
    .bind(new.status)
    .bind(&new.message)
    .bind(new.execution_time_ms)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to insert sync log for plan {} operation {}",
            new.plan_id, new.operation
        )
    })?;

    Ok(log)
}

/// Most recent audit rows for a plan, newest first.
pub async fn list_logs_for_plan(pool: &PgPool, plan_id: &str, limit: i64) -> Result<Vec<SyncLog>> {
    let logs = sqlx::query_as::<_, SyncLog>(
        "SELECT * FROM sync_logs \
         WHERE plan_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(plan_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list sync logs for plan {plan_id}"))?;

    Ok(logs)
}

/// Count audit rows created at or after `since`: `(total, errors)`.
pub async fn count_logs_since(pool: &PgPool, since: DateTime<Utc>) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'error') \
         FROM sync_logs WHERE created_at >= $1",
    )
    .bind(since)
    .fetch_one(pool)
    .await
    .context("failed to count sync logs")?;

    Ok(row)
}

/// Timestamp of the most recent successful audited operation, if any.
pub async fn last_success_at(pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
    let row: (Option<DateTime<Utc>>,) =
        sqlx::query_as("SELECT MAX(created_at) FROM sync_logs WHERE status = 'success'")
            .fetch_one(pool)
            .await
            .context("failed to query last successful sync")?;

    Ok(row.0)
}
