//! Snapshot comparison.
//!
//! Each `detect_*` function compares a Markdown-origin snapshot with the
//! stored snapshot of the same plan along one dimension and is a pure
//! function of its inputs. [`ConflictDetector`] runs all five and keeps
//! running totals.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use plansync_db::models::SyncOperation;

use super::hash::{plan_hash, task_similarity};
use crate::config::DetectionConfig;
use crate::model::{self, Conflict, ConflictType, Plan, Severity};
use crate::store::{OperationLog, PlanStore, StoreError};

/// Similarity to severity: `>= 0.9` low, `>= 0.7` medium, `>= 0.5` high,
/// otherwise critical.
pub fn similarity_severity(similarity: f64) -> Severity {
    if similarity >= 0.9 {
        Severity::Low
    } else if similarity >= 0.7 {
        Severity::Medium
    } else if similarity >= 0.5 {
        Severity::High
    } else {
        Severity::Critical
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn detect_timestamp_conflict(
    markdown: &Plan,
    dynamic: &Plan,
    config: &DetectionConfig,
    detected_at: DateTime<Utc>,
) -> Option<Conflict> {
    let gap = (markdown.updated_at - dynamic.updated_at).abs();
    if gap <= config.timestamp_tolerance() {
        return None;
    }
    let severity = if gap > config.escalation_gap() {
        Severity::High
    } else {
        Severity::Medium
    };
    let description = format!(
        "snapshots were updated {}s apart (tolerance {}s)",
        gap.num_seconds(),
        config.timestamp_tolerance_secs
    );
    Some(
        Conflict::new(&dynamic.id, ConflictType::Timestamp, severity, description, detected_at)
            .with_detail("markdown_updated_at", rfc3339(markdown.updated_at))
            .with_detail("dynamic_updated_at", rfc3339(dynamic.updated_at))
            .with_detail("gap_seconds", gap.num_seconds()),
    )
}

pub fn detect_content_conflict(
    markdown: &Plan,
    dynamic: &Plan,
    detected_at: DateTime<Utc>,
) -> Option<Conflict> {
    let markdown_hash = plan_hash(markdown);
    let dynamic_hash = plan_hash(dynamic);
    if markdown_hash == dynamic_hash {
        return None;
    }
    let similarity = task_similarity(markdown, dynamic);
    let description = format!(
        "plan content differs (task similarity {:.0}%)",
        similarity * 100.0
    );
    Some(
        Conflict::new(
            &dynamic.id,
            ConflictType::Content,
            similarity_severity(similarity),
            description,
            detected_at,
        )
        .with_detail("markdown_hash", markdown_hash)
        .with_detail("dynamic_hash", dynamic_hash)
        .with_detail("similarity", similarity),
    )
}

/// Flags a different *number* of distinct phases on each side.
pub fn detect_structure_conflict(
    markdown: &Plan,
    dynamic: &Plan,
    detected_at: DateTime<Utc>,
) -> Option<Conflict> {
    let md_phases = markdown.phases();
    let dy_phases = dynamic.phases();
    if md_phases.len() == dy_phases.len() {
        return None;
    }
    let only_markdown: Vec<&String> = md_phases.difference(&dy_phases).collect();
    let only_dynamic: Vec<&String> = dy_phases.difference(&md_phases).collect();
    let description = format!(
        "markdown has {} phases, store has {}",
        md_phases.len(),
        dy_phases.len()
    );
    Some(
        Conflict::new(
            &dynamic.id,
            ConflictType::Structure,
            Severity::High,
            description,
            detected_at,
        )
        .with_detail("markdown_phases", json!(md_phases))
        .with_detail("dynamic_phases", json!(dy_phases))
        .with_detail("only_markdown", json!(only_markdown))
        .with_detail("only_dynamic", json!(only_dynamic)),
    )
}

/// Version mismatch (medium) and progression gaps beyond the tolerance
/// (medium, high past `progression_high_gap`).
pub fn detect_metadata_conflicts(
    markdown: &Plan,
    dynamic: &Plan,
    config: &DetectionConfig,
    detected_at: DateTime<Utc>,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let (md, dy) = (&markdown.metadata, &dynamic.metadata);

    if md.version != dy.version {
        conflicts.push(
            Conflict::new(
                &dynamic.id,
                ConflictType::Metadata,
                Severity::Medium,
                format!("version differs: {:?} vs {:?}", md.version, dy.version),
                detected_at,
            )
            .keyed("version")
            .with_detail("field", "version")
            .with_detail("markdown_value", md.version.clone())
            .with_detail("dynamic_value", dy.version.clone()),
        );
    }

    let difference = (md.progression - dy.progression).abs();
    if difference > config.progression_tolerance {
        let severity = if difference > config.progression_high_gap {
            Severity::High
        } else {
            Severity::Medium
        };
        conflicts.push(
            Conflict::new(
                &dynamic.id,
                ConflictType::Metadata,
                severity,
                format!(
                    "progression differs: {}% vs {}%",
                    md.progression, dy.progression
                ),
                detected_at,
            )
            .keyed("progression")
            .with_detail("field", "progression")
            .with_detail("markdown_value", md.progression)
            .with_detail("dynamic_value", dy.progression)
            .with_detail("difference", difference),
        );
    }

    conflicts
}

/// One medium conflict per shared task id whose status differs.
pub fn detect_task_conflicts(
    markdown: &Plan,
    dynamic: &Plan,
    detected_at: DateTime<Utc>,
) -> Vec<Conflict> {
    dynamic
        .tasks
        .iter()
        .filter_map(|dy_task| {
            let md_task = markdown.task(&dy_task.id)?;
            if md_task.status == dy_task.status {
                return None;
            }
            Some(
                Conflict::new(
                    &dynamic.id,
                    ConflictType::Tasks,
                    Severity::Medium,
                    format!(
                        "task {:?} is {:?} in markdown but {:?} in store",
                        dy_task.title, md_task.status, dy_task.status
                    ),
                    detected_at,
                )
                .keyed(&dy_task.id)
                .with_detail("task_id", dy_task.id.clone())
                .with_detail("task_title", dy_task.title.clone())
                .with_detail("markdown_status", md_task.status.clone())
                .with_detail("dynamic_status", dy_task.status.clone())
                .with_detail("markdown_completed", md_task.completed)
                .with_detail("dynamic_completed", dy_task.completed),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub plan_id: String,
    pub conflicts: Vec<Conflict>,
    pub detected_at: DateTime<Utc>,
    pub duration: Duration,
}

impl DetectionResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for c in &self.conflicts {
            *counts.entry(c.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn by_type(&self) -> BTreeMap<ConflictType, usize> {
        let mut counts = BTreeMap::new();
        for c in &self.conflicts {
            *counts.entry(c.conflict_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.conflicts.iter().map(|c| c.severity).max()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectorStats {
    pub detections: u64,
    pub total_conflicts: u64,
    pub total_detection_time: Duration,
}

pub struct ConflictDetector {
    store: Arc<dyn PlanStore>,
    config: DetectionConfig,
    stats: Mutex<DetectorStats>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn PlanStore>, config: DetectionConfig) -> Self {
        Self {
            store,
            config,
            stats: Mutex::new(DetectorStats::default()),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Compare `markdown` with the stored snapshot of `plan_id`.
    pub async fn detect_conflicts(
        &self,
        plan_id: &str,
        markdown: &Plan,
    ) -> Result<DetectionResult, StoreError> {
        let started = Instant::now();
        let result = match self.store.load(plan_id).await {
            Ok(dynamic) => Ok(self.detect_between(markdown, &dynamic)),
            Err(e) => Err(e),
        };
        self.store
            .log_operation(OperationLog::from_result(
                plan_id,
                SyncOperation::DetectConflicts,
                &result,
                started.elapsed(),
            ))
            .await;

        if let Ok(r) = &result {
            info!(
                plan_id,
                conflicts = r.conflicts.len(),
                highest = ?r.highest_severity(),
                "conflict detection finished"
            );
        }
        result
    }

    /// Run the five comparisons. Conflicts are attributed to `dynamic.id`.
    pub fn detect_between(&self, markdown: &Plan, dynamic: &Plan) -> DetectionResult {
        let started = Instant::now();
        let detected_at = model::now();

        let mut conflicts = Vec::new();
        conflicts.extend(detect_timestamp_conflict(markdown, dynamic, &self.config, detected_at));
        conflicts.extend(detect_content_conflict(markdown, dynamic, detected_at));
        conflicts.extend(detect_structure_conflict(markdown, dynamic, detected_at));
        conflicts.extend(detect_metadata_conflicts(markdown, dynamic, &self.config, detected_at));
        conflicts.extend(detect_task_conflicts(markdown, dynamic, detected_at));

        let duration = started.elapsed();
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.detections += 1;
            stats.total_conflicts += conflicts.len() as u64;
            stats.total_detection_time += duration;
        }

        let types: BTreeSet<ConflictType> = conflicts.iter().map(|c| c.conflict_type).collect();
        debug!(plan_id = %dynamic.id, ?types, "compared snapshots");

        DetectionResult {
            plan_id: dynamic.id.clone(),
            conflicts,
            detected_at,
            duration,
        }
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = DetectorStats::default();
    }
}
