//! Runtime configuration for the synchronization workflows.
//!
//! Every section is optional in TOML; missing keys take the defaults below.
//!
//! ```toml
//! [markdown]
//! output_dir = "docs/plans"
//! overwrite_existing = true
//!
//! [resolution]
//! default_strategy = "manual"
//! auto_resolve = [{ type = "tasks", severity = "medium" }]
//!
//! [resolution.strategy_priorities]
//! tasks = ["auto-merge"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ConflictType, ResolutionStrategy, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub markdown: MarkdownConfig,
    pub detection: DetectionConfig,
    pub resolution: ResolutionConfig,
    pub vector_index: VectorIndexConfig,
    pub bulk: BulkConfig,
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse sync configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

// ---------------------------------------------------------------------------

/// Where and how synchronized Markdown files are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkdownConfig {
    pub output_dir: PathBuf,
    /// Replace an existing file at the target path. When false, an existing
    /// file makes the sync fail.
    pub overwrite_existing: bool,
    /// Copy an existing target to `<file>.backup.<timestamp>` first.
    pub backup_existing: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("plans"),
            overwrite_existing: true,
            backup_existing: true,
        }
    }
}

// ---------------------------------------------------------------------------

/// Thresholds used by the conflict detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Timestamp gaps up to this many seconds are not conflicts.
    pub timestamp_tolerance_secs: u64,
    /// Gaps above this many hours are high severity.
    pub escalation_gap_hours: u64,
    /// Progression gaps up to this many points are not conflicts.
    pub progression_tolerance: f64,
    /// Progression gaps above this many points are high severity.
    pub progression_high_gap: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: 5 * 60,
            escalation_gap_hours: 24,
            progression_tolerance: 5.0,
            progression_high_gap: 20.0,
        }
    }
}

impl DetectionConfig {
    pub fn timestamp_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timestamp_tolerance_secs as i64)
    }

    pub fn escalation_gap(&self) -> chrono::Duration {
        chrono::Duration::hours(self.escalation_gap_hours as i64)
    }
}

// ---------------------------------------------------------------------------

/// A `(type, severity)` pair that auto-resolution may act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResolveRule {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Severity,
}

impl AutoResolveRule {
    pub const fn new(conflict_type: ConflictType, severity: Severity) -> Self {
        Self {
            conflict_type,
            severity,
        }
    }
}

/// Resolver policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Snapshot the stored plan before applying any resolution.
    pub backup_before_resolve: bool,
    pub backup_dir: PathBuf,
    /// Used when no priority entry applies.
    pub default_strategy: ResolutionStrategy,
    /// Preferred strategies per conflict type name, first applicable wins.
    pub strategy_priorities: BTreeMap<String, Vec<ResolutionStrategy>>,
    /// Conflicts eligible for unattended resolution.
    pub auto_resolve: Vec<AutoResolveRule>,
    /// Recorded as `applied_by` when the caller names nobody.
    pub resolved_by: String,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        use ResolutionStrategy::*;

        let strategy_priorities = BTreeMap::from([
            (ConflictType::Tasks.to_string(), vec![AutoMerge]),
            (ConflictType::Metadata.to_string(), vec![AutoMerge]),
            (ConflictType::Content.to_string(), vec![AutoMerge, Manual]),
            (ConflictType::Timestamp.to_string(), vec![UseTarget]),
            (ConflictType::Structure.to_string(), vec![Manual]),
        ]);

        Self {
            backup_before_resolve: true,
            backup_dir: PathBuf::from("backups/conflicts"),
            default_strategy: Manual,
            strategy_priorities,
            auto_resolve: vec![
                AutoResolveRule::new(ConflictType::Tasks, Severity::Medium),
                AutoResolveRule::new(ConflictType::Metadata, Severity::Medium),
                AutoResolveRule::new(ConflictType::Content, Severity::Low),
                AutoResolveRule::new(ConflictType::Timestamp, Severity::Medium),
            ],
            resolved_by: "plansync".to_owned(),
        }
    }
}

impl ResolutionConfig {
    pub fn priorities_for(&self, conflict_type: ConflictType) -> &[ResolutionStrategy] {
        self.strategy_priorities
            .get(&conflict_type.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn allows_auto_resolve(&self, conflict_type: ConflictType, severity: Severity) -> bool {
        self.auto_resolve
            .iter()
            .any(|r| r.conflict_type == conflict_type && r.severity == severity)
    }
}

// ---------------------------------------------------------------------------

/// Connection settings for the Qdrant vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub enabled: bool,
    pub url: String,
    pub collection: String,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:6333".to_owned(),
            collection: "development_plans".to_owned(),
            timeout_secs: 10,
            api_key: None,
        }
    }
}

impl VectorIndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------

/// Limits applied to bulk operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Deadline for a single item; an item that exceeds it counts as failed.
    pub per_item_timeout_secs: u64,
    pub max_concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            per_item_timeout_secs: 30,
            max_concurrency: 4,
        }
    }
}

impl BulkConfig {
    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_secs(self.per_item_timeout_secs)
    }
}
