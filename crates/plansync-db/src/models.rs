use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Operation recorded in the `sync_logs` audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    StorePlan,
    GetPlan,
    SyncMarkdown,
    DetectConflicts,
    ResolveConflicts,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StorePlan => "store_plan",
            Self::GetPlan => "get_plan",
            Self::SyncMarkdown => "sync_markdown",
            Self::DetectConflicts => "detect_conflicts",
            Self::ResolveConflicts => "resolve_conflicts",
        };
        f.write_str(s)
    }
}

impl FromStr for SyncOperation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store_plan" => Ok(Self::StorePlan),
            "get_plan" => Ok(Self::GetPlan),
            "sync_markdown" => Ok(Self::SyncMarkdown),
            "detect_conflicts" => Ok(Self::DetectConflicts),
            "resolve_conflicts" => Ok(Self::ResolveConflicts),
            other => Err(ParseEnumError::new("sync operation", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Outcome recorded for an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

impl FromStr for LogStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(ParseEnumError::new("log status", other)),
        }
    }
}

/// Error returned when parsing an unknown enum string.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A row of the `plans` table.
///
/// `metadata_json` carries the fields that have no dedicated column (the
/// human date string and the embedding vector).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRow {
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

/// A row of the `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub plan_id: String,
    pub position: i32,
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

/// A row of the `sync_logs` audit table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncLog {
    pub id: i64,
    /// NULL when the plan did not exist at log time or was deleted since.
    pub plan_id: Option<String>,
    pub operation: SyncOperation,
    pub status: LogStatus,
    pub message: String,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
