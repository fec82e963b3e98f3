//! Durable storage of canonical plans.
//!
//! [`PlanStore`] is the narrow seam the detector, resolver, synchronizer and
//! orchestrator talk to. [`PgPlanStore`] is the production backend;
//! [`MemoryPlanStore`] keeps everything in process for tests and dry runs.
//!
//! Storing the same id twice overwrites the mutable fields and replaces the
//! task set wholesale (last writer wins). `created_at` of an existing plan
//! is kept.

mod memory;
mod postgres;

pub use memory::{MemoryPlanStore, OperationRecord};
pub use postgres::PgPlanStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use plansync_db::models::{LogStatus, SyncOperation};

use crate::model::Plan;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown plan id. Recoverable: there is nothing to sync or compare.
    #[error("plan {0} not found")]
    NotFound(String),

    /// The backend failed. Fatal for the current operation.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Aggregate figures over everything in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub total_plans: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub average_progression: f64,
    /// Audited operations during the last 24 hours.
    pub operations_last_24h: i64,
    pub errors_last_24h: i64,
    /// Most recent successful audited operation.
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// One audit entry, written after every store/retrieve and by higher
/// layers for their own workflows.
#[derive(Debug, Clone)]
pub struct OperationLog {
    pub plan_id: String,
    pub operation: SyncOperation,
    pub status: LogStatus,
    pub message: String,
    pub elapsed: Duration,
}

impl OperationLog {
    pub fn success(plan_id: &str, operation: SyncOperation, elapsed: Duration) -> Self {
        Self {
            plan_id: plan_id.to_owned(),
            operation,
            status: LogStatus::Success,
            message: String::new(),
            elapsed,
        }
    }

    pub fn error(
        plan_id: &str,
        operation: SyncOperation,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            plan_id: plan_id.to_owned(),
            operation,
            status: LogStatus::Error,
            message: message.into(),
            elapsed,
        }
    }

    /// Success or error entry depending on `result`.
    pub fn from_result<T, E: std::fmt::Display>(
        plan_id: &str,
        operation: SyncOperation,
        result: &Result<T, E>,
        elapsed: Duration,
    ) -> Self {
        match result {
            Ok(_) => Self::success(plan_id, operation, elapsed),
            Err(e) => Self::error(plan_id, operation, format!("{e:#}"), elapsed),
        }
    }
}

/// Persistence of canonical plans.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Short backend name for logs and health reports.
    fn name(&self) -> &str;

    /// Insert or replace a plan and its full task set atomically.
    async fn save(&self, plan: &Plan) -> Result<(), StoreError>;

    /// Fetch a plan with its tasks in stored order.
    async fn load(&self, id: &str) -> Result<Plan, StoreError>;

    /// Every stored plan id, most recently updated first.
    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn stats(&self) -> Result<SyncStats, StoreError>;

    /// Cheap connectivity probe.
    async fn health(&self) -> Result<(), StoreError>;

    /// Append an audit entry. Failing to audit never fails the caller's
    /// operation; backends log and swallow their own audit errors.
    async fn log_operation(&self, entry: OperationLog);
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore) {}
};
