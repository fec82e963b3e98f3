use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Dimension along which two snapshots of a plan diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Timestamp,
    Content,
    Structure,
    Metadata,
    Tasks,
}

impl ConflictType {
    pub const ALL: [ConflictType; 5] = [
        Self::Timestamp,
        Self::Content,
        Self::Structure,
        Self::Metadata,
        Self::Tasks,
    ];
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timestamp => "timestamp",
            Self::Content => "content",
            Self::Structure => "structure",
            Self::Metadata => "metadata",
            Self::Tasks => "tasks",
        })
    }
}

impl FromStr for ConflictType {
    type Err = ParseConflictEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(Self::Timestamp),
            "content" => Ok(Self::Content),
            "structure" => Ok(Self::Structure),
            "metadata" => Ok(Self::Metadata),
            "tasks" => Ok(Self::Tasks),
            other => Err(ParseConflictEnumError::new("conflict type", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// How urgently a conflict needs attention. Ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

impl FromStr for Severity {
    type Err = ParseConflictEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ParseConflictEnumError::new("severity", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Strategy used to settle a conflict.
///
/// "Source" is the Markdown-origin snapshot, "target" the store-origin one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    Manual,
    AutoMerge,
    UseSource,
    UseTarget,
    BackupBoth,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::AutoMerge => "auto-merge",
            Self::UseSource => "use-source",
            Self::UseTarget => "use-target",
            Self::BackupBoth => "backup-both",
        })
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ParseConflictEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "auto-merge" => Ok(Self::AutoMerge),
            "use-source" => Ok(Self::UseSource),
            "use-target" => Ok(Self::UseTarget),
            "backup-both" => Ok(Self::BackupBoth),
            other => Err(ParseConflictEnumError::new("resolution strategy", other)),
        }
    }
}

/// Error returned when parsing an unknown conflict enum string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseConflictEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseConflictEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Outcome of handling one [`Conflict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    /// What was done, for humans.
    pub action: String,
    /// The chosen value (`null` when nothing was chosen).
    pub result: Value,
    pub applied: bool,
    pub applied_by: String,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_reference: Option<String>,
}

/// A divergence between the Markdown-origin and store-origin snapshot of
/// the same plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub plan_id: String,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub description: String,
    /// Comparison evidence consumed by the resolver.
    pub details: BTreeMap<String, Value>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Build a conflict with id `conflict-<planId>-<type>-<timestamp>`.
    pub fn new(
        plan_id: &str,
        conflict_type: ConflictType,
        severity: Severity,
        description: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!(
                "conflict-{plan_id}-{conflict_type}-{}",
                detected_at.format("%Y%m%d%H%M%S%6f")
            ),
            plan_id: plan_id.to_owned(),
            conflict_type,
            severity,
            description: description.into(),
            details: BTreeMap::new(),
            detected_at,
            resolution: None,
        }
    }

    /// Suffix the id so several conflicts of one type detected in the same
    /// pass stay distinct.
    pub fn keyed(mut self, key: &str) -> Self {
        self.id.push('-');
        self.id.push_str(key);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_owned(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    pub fn detail_f64(&self, key: &str) -> Option<f64> {
        self.details.get(key).and_then(Value::as_f64)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.as_ref().is_some_and(|r| r.applied)
    }
}
