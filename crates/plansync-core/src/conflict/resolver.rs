//! Policy-driven conflict resolution.
//!
//! "Source" is the Markdown-origin snapshot and "target" the stored one.
//! The stored plan is loaded once per call, every applied resolution is
//! folded into it, and it is saved once if anything changed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use plansync_db::models::SyncOperation;

use super::detector::ConflictDetector;
use crate::backup;
use crate::config::ResolutionConfig;
use crate::model::{
    self, Conflict, ConflictResolution, ConflictType, Plan, ResolutionStrategy, STATUS_COMPLETED,
};
use crate::store::{OperationLog, PlanStore, StoreError};

/// Content conflicts merge automatically only above this similarity.
pub const CONTENT_MERGE_THRESHOLD: f64 = 0.8;

/// Rank on the fixed order
/// `completed > in_progress > blocked > pending > not_started`.
/// Unknown statuses rank below all of them.
pub fn status_rank(status: &str) -> u8 {
    match status {
        "completed" => 5,
        "in_progress" => 4,
        "blocked" => 3,
        "pending" => 2,
        "not_started" => 1,
        _ => 0,
    }
}

/// Lexicographic "greater or equal wins"; ties go to `a`.
pub fn version_wins<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a >= b { a } else { b }
}

/// Whether `strategy` can act on a conflict of this type at all.
pub fn strategy_applies(strategy: ResolutionStrategy, conflict_type: ConflictType) -> bool {
    match strategy {
        ResolutionStrategy::AutoMerge => matches!(
            conflict_type,
            ConflictType::Tasks | ConflictType::Metadata | ConflictType::Content
        ),
        _ => true,
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub plan_id: String,
    pub conflicts: Vec<Conflict>,
    /// Applied to every conflict; `None` picks one per conflict from the
    /// configured priorities.
    pub strategy: Option<ResolutionStrategy>,
    /// Recorded as `applied_by`; defaults to the configured name.
    pub user: Option<String>,
    /// Markdown-origin plan, needed for wholesale `use-source` and
    /// `backup-both`.
    pub source_snapshot: Option<Plan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub plan_id: String,
    /// True when no conflict was left unresolved.
    pub success: bool,
    pub resolved_conflicts: Vec<Conflict>,
    pub failed_conflicts: Vec<Conflict>,
    /// Snapshot taken before any change, when enabled and successful.
    pub backup_path: Option<PathBuf>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolverStats {
    pub total_resolutions: u64,
    pub auto_resolutions: u64,
    pub manual_resolutions: u64,
    pub failed_resolutions: u64,
    pub backups_created: u64,
    pub total_resolution_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Requested,
    Automatic,
}

/// What one strategy decided for one conflict.
struct Outcome {
    applied: bool,
    action: String,
    result: Value,
    backup_reference: Option<String>,
}

impl Outcome {
    fn applied(action: impl Into<String>, result: Value) -> Self {
        Self {
            applied: true,
            action: action.into(),
            result,
            backup_reference: None,
        }
    }

    fn open(action: impl Into<String>) -> Self {
        Self {
            applied: false,
            action: action.into(),
            result: Value::Null,
            backup_reference: None,
        }
    }
}

pub struct ConflictResolver {
    store: Arc<dyn PlanStore>,
    detector: Arc<ConflictDetector>,
    config: ResolutionConfig,
    stats: Mutex<ResolverStats>,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<dyn PlanStore>,
        detector: Arc<ConflictDetector>,
        config: ResolutionConfig,
    ) -> Self {
        Self {
            store,
            detector,
            config,
            stats: Mutex::new(ResolverStats::default()),
        }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// First configured strategy that applies to the conflict's type,
    /// otherwise the default strategy.
    pub fn determine_strategy(&self, conflict: &Conflict) -> ResolutionStrategy {
        self.config
            .priorities_for(conflict.conflict_type)
            .iter()
            .copied()
            .find(|s| strategy_applies(*s, conflict.conflict_type))
            .unwrap_or(self.config.default_strategy)
    }

    pub async fn resolve_conflicts(
        &self,
        request: ResolutionRequest,
    ) -> Result<ResolutionResult, StoreError> {
        let user = request
            .user
            .unwrap_or_else(|| self.config.resolved_by.clone());
        self.resolve_batch(
            &request.plan_id,
            request.conflicts,
            request.strategy,
            &user,
            request.source_snapshot.as_ref(),
            Mode::Requested,
        )
        .await
    }

    /// Detect conflicts between `markdown` and the stored plan, resolve the
    /// ones on the auto-resolve allow-list and report the rest as failed.
    pub async fn auto_resolve_conflicts(
        &self,
        plan_id: &str,
        markdown: &Plan,
    ) -> Result<ResolutionResult, StoreError> {
        let detection = self.detector.detect_conflicts(plan_id, markdown).await?;

        let (eligible, ineligible): (Vec<Conflict>, Vec<Conflict>) =
            detection.conflicts.into_iter().partition(|c| {
                self.config
                    .allows_auto_resolve(c.conflict_type, c.severity)
            });

        let user = self.config.resolved_by.clone();
        let mut result = self
            .resolve_batch(plan_id, eligible, None, &user, Some(markdown), Mode::Automatic)
            .await?;

        if !ineligible.is_empty() {
            let now = model::now();
            for mut conflict in ineligible {
                conflict.resolution = Some(ConflictResolution {
                    strategy: ResolutionStrategy::Manual,
                    action: format!(
                        "{} {} conflicts are not eligible for automatic resolution",
                        conflict.severity, conflict.conflict_type
                    ),
                    result: Value::Null,
                    applied: false,
                    applied_by: user.clone(),
                    applied_at: now,
                    backup_reference: None,
                });
                result.failed_conflicts.push(conflict);
                self.with_stats(|s| s.failed_resolutions += 1);
            }
            result.success = false;
        }
        Ok(result)
    }

    async fn resolve_batch(
        &self,
        plan_id: &str,
        conflicts: Vec<Conflict>,
        strategy: Option<ResolutionStrategy>,
        user: &str,
        source: Option<&Plan>,
        mode: Mode,
    ) -> Result<ResolutionResult, StoreError> {
        let started = Instant::now();
        let result = self
            .resolve_inner(plan_id, conflicts, strategy, user, source, mode)
            .await;
        let elapsed = started.elapsed();

        self.store
            .log_operation(OperationLog::from_result(
                plan_id,
                SyncOperation::ResolveConflicts,
                &result,
                elapsed,
            ))
            .await;

        if let Ok(r) = &result {
            info!(
                plan_id,
                resolved = r.resolved_conflicts.len(),
                failed = r.failed_conflicts.len(),
                automatic = mode == Mode::Automatic,
                "conflict resolution finished"
            );
        }
        self.with_stats(|s| s.total_resolution_time += elapsed);
        result
    }

    async fn resolve_inner(
        &self,
        plan_id: &str,
        conflicts: Vec<Conflict>,
        strategy: Option<ResolutionStrategy>,
        user: &str,
        source: Option<&Plan>,
        mode: Mode,
    ) -> Result<ResolutionResult, StoreError> {
        let started = Instant::now();
        let target = self.store.load(plan_id).await?;
        let now = model::now();

        let mut backup_path = None;
        if self.config.backup_before_resolve && !conflicts.is_empty() {
            match backup::backup_plan(&self.config.backup_dir, &target, now) {
                Ok(dir) => {
                    self.with_stats(|s| s.backups_created += 1);
                    backup_path = Some(dir);
                }
                Err(e) => warn!(plan_id, "pre-resolution backup failed, continuing: {e:#}"),
            }
        }

        let mut working = target.clone();
        let mut resolved = Vec::new();
        let mut failed = Vec::new();
        let mut backup_dirs = HashSet::new();

        for mut conflict in conflicts {
            let chosen = strategy.unwrap_or_else(|| self.determine_strategy(&conflict));
            let outcome = self.apply(chosen, &conflict, &target, source, &mut working, now);
            if let Some(reference) = &outcome.backup_reference {
                if backup_dirs.insert(reference.clone()) {
                    self.with_stats(|s| s.backups_created += 1);
                }
            }

            conflict.resolution = Some(ConflictResolution {
                strategy: chosen,
                action: outcome.action,
                result: outcome.result,
                applied: outcome.applied,
                applied_by: user.to_owned(),
                applied_at: now,
                backup_reference: outcome.backup_reference,
            });

            if outcome.applied {
                self.with_stats(|s| {
                    s.total_resolutions += 1;
                    match mode {
                        Mode::Automatic => s.auto_resolutions += 1,
                        Mode::Requested => s.manual_resolutions += 1,
                    }
                });
                resolved.push(conflict);
            } else {
                self.with_stats(|s| s.failed_resolutions += 1);
                failed.push(conflict);
            }
        }

        if working != target {
            working.updated_at = now;
            self.store.save(&working).await?;
        }

        Ok(ResolutionResult {
            plan_id: plan_id.to_owned(),
            success: failed.is_empty(),
            resolved_conflicts: resolved,
            failed_conflicts: failed,
            backup_path,
            duration: started.elapsed(),
        })
    }

    fn apply(
        &self,
        strategy: ResolutionStrategy,
        conflict: &Conflict,
        target: &Plan,
        source: Option<&Plan>,
        working: &mut Plan,
        now: DateTime<Utc>,
    ) -> Outcome {
        match strategy {
            ResolutionStrategy::Manual => Outcome::open("requires a manual decision"),
            ResolutionStrategy::UseTarget => Outcome::applied(
                "kept the stored value",
                side_value(conflict, Side::Dynamic),
            ),
            ResolutionStrategy::UseSource => use_source(conflict, source, working, now),
            ResolutionStrategy::BackupBoth => self.backup_both(conflict, target, source, now),
            ResolutionStrategy::AutoMerge => auto_merge(conflict, source, working, now),
        }
    }

    fn backup_both(
        &self,
        conflict: &Conflict,
        target: &Plan,
        source: Option<&Plan>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let Some(source) = source else {
            return Outcome::open("backup-both needs the markdown snapshot");
        };
        match backup::backup_both(&self.config.backup_dir, source, target, now) {
            Ok(dir) => Outcome {
                applied: false,
                action: "recorded both versions; awaiting a manual decision".to_owned(),
                result: json!({
                    "markdown": side_value(conflict, Side::Markdown),
                    "dynamic": side_value(conflict, Side::Dynamic),
                }),
                backup_reference: Some(dir.display().to_string()),
            },
            Err(e) => {
                warn!(conflict_id = %conflict.id, "backup-both failed: {e:#}");
                Outcome::open(format!("backup failed: {e:#}"))
            }
        }
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = ResolverStats::default();
    }

    /// Remove conflict backups older than `max_age`.
    pub fn cleanup_old_backups(&self, max_age: Duration) -> anyhow::Result<usize> {
        let removed = backup::cleanup_old_backups(&self.config.backup_dir, max_age)?;
        if removed > 0 {
            info!(removed, dir = %self.config.backup_dir.display(), "removed old conflict backups");
        }
        Ok(removed)
    }

    fn with_stats(&self, f: impl FnOnce(&mut ResolverStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Side {
    Markdown,
    Dynamic,
}

/// The value one side holds for the conflicting field.
fn side_value(conflict: &Conflict, side: Side) -> Value {
    let key = match (conflict.conflict_type, side) {
        (ConflictType::Tasks, Side::Markdown) => "markdown_status",
        (ConflictType::Tasks, Side::Dynamic) => "dynamic_status",
        (ConflictType::Metadata, Side::Markdown) => "markdown_value",
        (ConflictType::Metadata, Side::Dynamic) => "dynamic_value",
        (ConflictType::Timestamp, Side::Markdown) => "markdown_updated_at",
        (ConflictType::Timestamp, Side::Dynamic) => "dynamic_updated_at",
        (ConflictType::Content, Side::Markdown) => "markdown_hash",
        (ConflictType::Content, Side::Dynamic) => "dynamic_hash",
        (ConflictType::Structure, Side::Markdown) => "markdown_phases",
        (ConflictType::Structure, Side::Dynamic) => "dynamic_phases",
    };
    conflict.detail(key).cloned().unwrap_or(Value::Null)
}

fn set_task_status(working: &mut Plan, task_id: &str, status: &str, now: DateTime<Utc>) -> bool {
    match working.task_mut(task_id) {
        Some(task) => {
            if task.status != status {
                task.status = status.to_owned();
                task.updated_at = now;
            }
            true
        }
        None => false,
    }
}

fn set_task_completed(working: &mut Plan, task_id: &str, completed: bool, now: DateTime<Utc>) {
    if let Some(task) = working.task_mut(task_id) {
        if task.completed != completed {
            task.completed = completed;
            task.updated_at = now;
        }
    }
}

fn set_metadata_field(working: &mut Plan, conflict: &Conflict, value: &Value) -> Result<(), String> {
    match conflict.detail_str("field") {
        Some("version") => {
            let v = value.as_str().ok_or("version value is not a string")?;
            working.metadata.version = v.to_owned();
            Ok(())
        }
        Some("progression") => {
            let v = value.as_f64().ok_or("progression value is not a number")?;
            working.metadata.progression = v;
            Ok(())
        }
        other => Err(format!("unknown metadata field {other:?}")),
    }
}

/// Replace everything but identity and creation time with `source`.
fn adopt_source(working: &mut Plan, source: &Plan) {
    working.metadata = source.metadata.clone();
    working.tasks = source.tasks.clone();
    if !source.embeddings.is_empty() {
        working.embeddings = source.embeddings.clone();
    }
}

fn use_source(
    conflict: &Conflict,
    source: Option<&Plan>,
    working: &mut Plan,
    now: DateTime<Utc>,
) -> Outcome {
    let value = side_value(conflict, Side::Markdown);
    match conflict.conflict_type {
        ConflictType::Tasks => {
            let (Some(task_id), Some(status)) = (
                conflict.detail_str("task_id"),
                conflict.detail_str("markdown_status"),
            ) else {
                return Outcome::open("conflict is missing task details");
            };
            let completed = conflict
                .detail("markdown_completed")
                .and_then(Value::as_bool)
                .or_else(|| source.and_then(|s| s.task(task_id)).map(|t| t.completed))
                .unwrap_or(status == STATUS_COMPLETED);
            if !set_task_status(working, task_id, status, now) {
                return Outcome::open(format!("task {task_id} no longer exists in the store"));
            }
            set_task_completed(working, task_id, completed, now);
            Outcome::applied("adopted the markdown status", value)
        }
        ConflictType::Metadata => match set_metadata_field(working, conflict, &value) {
            Ok(()) => Outcome::applied("adopted the markdown value", value),
            Err(e) => Outcome::open(e),
        },
        ConflictType::Timestamp => Outcome::applied("adopted the markdown timestamp", value),
        ConflictType::Content | ConflictType::Structure => match source {
            Some(source) => {
                adopt_source(working, source);
                Outcome::applied("replaced the stored plan with the markdown version", value)
            }
            None => Outcome::open("use-source needs the markdown snapshot"),
        },
    }
}

fn auto_merge(
    conflict: &Conflict,
    source: Option<&Plan>,
    working: &mut Plan,
    now: DateTime<Utc>,
) -> Outcome {
    match conflict.conflict_type {
        ConflictType::Tasks => {
            let (Some(task_id), Some(md), Some(dy)) = (
                conflict.detail_str("task_id"),
                conflict.detail_str("markdown_status"),
                conflict.detail_str("dynamic_status"),
            ) else {
                return Outcome::open("conflict is missing task details");
            };
            let winner = if status_rank(md) >= status_rank(dy) { md } else { dy };
            if !set_task_status(working, task_id, winner, now) {
                return Outcome::open(format!("task {task_id} no longer exists in the store"));
            }
            if winner == STATUS_COMPLETED {
                set_task_completed(working, task_id, true, now);
            }
            Outcome::applied(format!("kept the more advanced status {winner:?}"), json!(winner))
        }
        ConflictType::Metadata => {
            let md = side_value(conflict, Side::Markdown);
            let dy = side_value(conflict, Side::Dynamic);
            let winner = match conflict.detail_str("field") {
                Some("version") => match (md.as_str(), dy.as_str()) {
                    (Some(a), Some(b)) => json!(version_wins(a, b)),
                    _ => return Outcome::open("version values are not strings"),
                },
                Some("progression") => match (md.as_f64(), dy.as_f64()) {
                    (Some(a), Some(b)) => json!(a.max(b)),
                    _ => return Outcome::open("progression values are not numbers"),
                },
                other => return Outcome::open(format!("unknown metadata field {other:?}")),
            };
            match set_metadata_field(working, conflict, &winner) {
                Ok(()) => Outcome::applied("kept the greater value", winner),
                Err(e) => Outcome::open(e),
            }
        }
        ConflictType::Content => {
            let similarity = conflict.detail_f64("similarity").unwrap_or(0.0);
            if similarity <= CONTENT_MERGE_THRESHOLD {
                return Outcome::open(format!(
                    "similarity {similarity:.2} is too low to merge automatically"
                ));
            }
            let added = source.map_or(0, |source| {
                let missing: Vec<_> = source
                    .tasks
                    .iter()
                    .filter(|t| working.task(&t.id).is_none())
                    .cloned()
                    .collect();
                let n = missing.len();
                working.tasks.extend(missing);
                n
            });
            Outcome::applied(
                format!("merged near-identical content ({added} task(s) added from markdown)"),
                json!({ "similarity": similarity, "added_tasks": added }),
            )
        }
        ConflictType::Timestamp | ConflictType::Structure => Outcome::open(format!(
            "{} conflicts cannot be merged automatically",
            conflict.conflict_type
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::model::Severity;
    use crate::model::fixtures::{plan, task};
    use crate::store::MemoryPlanStore;

    struct Fixture {
        store: Arc<MemoryPlanStore>,
        resolver: ConflictResolver,
        _backups: tempfile::TempDir,
    }

    fn fixture(configure: impl FnOnce(&mut ResolutionConfig)) -> Fixture {
        let backups = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryPlanStore::new());
        let detector = Arc::new(ConflictDetector::new(store.clone(), DetectionConfig::default()));
        let mut config = ResolutionConfig {
            backup_dir: backups.path().to_path_buf(),
            ..ResolutionConfig::default()
        };
        configure(&mut config);
        Fixture {
            resolver: ConflictResolver::new(store.clone(), detector, config),
            store,
            _backups: backups,
        }
    }

    fn stored() -> Plan {
        plan(
            "plan-1",
            vec![
                task("a", "Schema", "pending", "Phase 1"),
                task("b", "Queries", "pending", "Phase 1"),
            ],
        )
    }

    fn request(conflicts: Vec<Conflict>, strategy: Option<ResolutionStrategy>) -> ResolutionRequest {
        ResolutionRequest {
            plan_id: "plan-1".into(),
            conflicts,
            strategy,
            user: Some("alice".into()),
            source_snapshot: None,
        }
    }

    #[test]
    fn status_order_and_version_rule() {
        assert!(status_rank("completed") > status_rank("in_progress"));
        assert!(status_rank("in_progress") > status_rank("blocked"));
        assert!(status_rank("blocked") > status_rank("pending"));
        assert!(status_rank("pending") > status_rank("not_started"));
        assert_eq!(version_wins("1.2", "1.10"), "1.2");
        assert_eq!(version_wins("2.0", "2.0"), "2.0");
        assert_eq!(version_wins("1.0", "1.1"), "1.1");
    }

    #[tokio::test]
    async fn progression_scenario_resolves_to_larger_value() {
        let h = fixture(|_| {});
        let mut dy = stored();
        dy.metadata.progression = 75.0;
        h.store.save(&dy).await.unwrap();
        let mut md = stored();
        md.metadata.progression = 50.0;

        let conflicts =
            crate::conflict::detect_metadata_conflicts(&md, &dy, &DetectionConfig::default(), model::now());
        assert_eq!(conflicts.len(), 1);

        let result = h
            .resolver
            .resolve_conflicts(request(conflicts, Some(ResolutionStrategy::AutoMerge)))
            .await
            .unwrap();
        assert!(result.success);
        let resolution = result.resolved_conflicts[0].resolution.as_ref().unwrap();
        assert_eq!(resolution.result, json!(75.0));
        assert_eq!(resolution.applied_by, "alice");
        assert_eq!(h.store.load("plan-1").await.unwrap().metadata.progression, 75.0);
    }

    #[tokio::test]
    async fn completed_beats_pending() {
        let h = fixture(|_| {});
        h.store.save(&stored()).await.unwrap();
        let mut md = stored();
        md.tasks[0].status = "completed".into();
        md.tasks[0].completed = true;

        let result = h.resolver.auto_resolve_conflicts("plan-1", &md).await.unwrap();
        let task_conflict = result
            .resolved_conflicts
            .iter()
            .find(|c| c.conflict_type == ConflictType::Tasks)
            .unwrap();
        assert_eq!(
            task_conflict.resolution.as_ref().unwrap().result,
            json!("completed")
        );

        let after = h.store.load("plan-1").await.unwrap();
        assert_eq!(after.task("a").unwrap().status, "completed");
        assert!(after.task("a").unwrap().completed);
        assert!(result.backup_path.is_some());
    }

    #[tokio::test]
    async fn low_similarity_content_never_auto_resolves() {
        let h = fixture(|c| {
            c.auto_resolve.push(crate::config::AutoResolveRule::new(
                ConflictType::Content,
                Severity::Critical,
            ))
        });
        h.store.save(&stored()).await.unwrap();
        let md = plan("plan-1", vec![task("z", "Other", "pending", "Phase 1")]);

        let result = h.resolver.auto_resolve_conflicts("plan-1", &md).await.unwrap();
        assert!(!result.success);
        let content = result
            .failed_conflicts
            .iter()
            .find(|c| c.conflict_type == ConflictType::Content)
            .unwrap();
        assert!(!content.is_resolved());
        assert_eq!(h.store.load("plan-1").await.unwrap(), stored());
    }

    #[tokio::test]
    async fn ineligible_conflicts_are_reported_not_dropped() {
        let h = fixture(|c| c.auto_resolve.clear());
        h.store.save(&stored()).await.unwrap();
        let mut md = stored();
        md.tasks[1].status = "blocked".into();

        let result = h.resolver.auto_resolve_conflicts("plan-1", &md).await.unwrap();
        assert!(!result.success);
        assert!(result.resolved_conflicts.is_empty());
        assert!(!result.failed_conflicts.is_empty());
        assert!(result
            .failed_conflicts
            .iter()
            .all(|c| c.resolution.as_ref().is_some_and(|r| !r.applied)));
    }

    #[tokio::test]
    async fn structure_falls_back_to_manual() {
        let h = fixture(|c| {
            c.strategy_priorities
                .insert("structure".into(), vec![ResolutionStrategy::AutoMerge]);
        });
        let c = Conflict::new(
            "plan-1",
            ConflictType::Structure,
            Severity::High,
            "phases differ",
            model::now(),
        );
        assert_eq!(h.resolver.determine_strategy(&c), ResolutionStrategy::Manual);

        let t = Conflict::new("plan-1", ConflictType::Timestamp, Severity::Medium, "", model::now());
        assert_eq!(h.resolver.determine_strategy(&t), ResolutionStrategy::UseTarget);
    }

    #[tokio::test]
    async fn backup_both_keeps_conflict_open() {
        let h = fixture(|_| {});
        h.store.save(&stored()).await.unwrap();
        let mut md = stored();
        md.tasks[0].status = "in_progress".into();
        let conflicts = crate::conflict::detect_task_conflicts(&md, &stored(), model::now());

        let mut req = request(conflicts, Some(ResolutionStrategy::BackupBoth));
        req.source_snapshot = Some(md);
        let result = h.resolver.resolve_conflicts(req).await.unwrap();

        assert!(!result.success);
        let r = result.failed_conflicts[0].resolution.as_ref().unwrap();
        assert!(!r.applied);
        let dir = PathBuf::from(r.backup_reference.as_ref().unwrap());
        assert!(dir.join(backup::MARKDOWN_SNAPSHOT_FILE).is_file());
        assert!(dir.join(backup::DYNAMIC_SNAPSHOT_FILE).is_file());
        assert!(!dir.join(backup::PLAN_BACKUP_FILE).exists());

        let pre = result.backup_path.as_ref().unwrap();
        assert_ne!(pre, &dir);
        assert!(pre.join(backup::PLAN_BACKUP_FILE).is_file());
        assert!(!pre.join(backup::MARKDOWN_SNAPSHOT_FILE).exists());

        assert_eq!(h.store.load("plan-1").await.unwrap(), stored());
        assert_eq!(h.resolver.stats().backups_created, 2);
    }

    #[tokio::test]
    async fn backup_both_counts_one_directory_per_batch() {
        let h = fixture(|c| c.backup_before_resolve = false);
        h.store.save(&stored()).await.unwrap();
        let mut md = stored();
        md.tasks[0].status = "in_progress".into();
        md.tasks[1].status = "blocked".into();
        let conflicts = crate::conflict::detect_task_conflicts(&md, &stored(), model::now());
        assert_eq!(conflicts.len(), 2);

        let mut req = request(conflicts, Some(ResolutionStrategy::BackupBoth));
        req.source_snapshot = Some(md);
        let result = h.resolver.resolve_conflicts(req).await.unwrap();

        let refs: HashSet<_> = result
            .failed_conflicts
            .iter()
            .filter_map(|c| c.resolution.as_ref()?.backup_reference.clone())
            .collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(h.resolver.stats().backups_created, 1);
    }

    #[tokio::test]
    async fn use_source_replaces_structure_wholesale() {
        let h = fixture(|c| c.backup_before_resolve = false);
        h.store.save(&stored()).await.unwrap();
        let mut md = stored();
        md.tasks.push(task("c", "Docs", "pending", "Phase 2"));
        let conflicts = vec![
            crate::conflict::detect_structure_conflict(&md, &stored(), model::now()).unwrap(),
        ];

        let mut req = request(conflicts, Some(ResolutionStrategy::UseSource));
        req.source_snapshot = Some(md);
        let result = h.resolver.resolve_conflicts(req).await.unwrap();

        assert!(result.success);
        assert!(result.backup_path.is_none());
        let after = h.store.load("plan-1").await.unwrap();
        assert_eq!(after.tasks.len(), 3);
        assert_eq!(after.created_at, stored().created_at);
    }

    #[tokio::test]
    async fn use_source_unchecks_a_completed_task() {
        let h = fixture(|c| c.backup_before_resolve = false);
        let mut dy = stored();
        dy.tasks[0].status = "completed".into();
        dy.tasks[0].completed = true;
        h.store.save(&dy).await.unwrap();
        let md = stored();

        let conflicts = crate::conflict::detect_task_conflicts(&md, &dy, model::now());
        assert_eq!(conflicts.len(), 1);
        let result = h
            .resolver
            .resolve_conflicts(request(conflicts, Some(ResolutionStrategy::UseSource)))
            .await
            .unwrap();
        assert!(result.success);

        let after = h.store.load("plan-1").await.unwrap();
        let a = after.task("a").unwrap();
        assert_eq!(a.status, "pending");
        assert!(!a.completed);

        let rendered = crate::sync::render::render_plan(&after, model::now());
        assert!(rendered.lines().any(|l| l == "- [ ] Schema"), "{rendered}");
        assert!(!rendered.contains("- [x] Schema"));
        assert!(crate::conflict::detect_task_conflicts(&md, &after, model::now()).is_empty());
    }

    #[tokio::test]
    async fn manual_and_use_target_change_nothing() {
        let h = fixture(|_| {});
        h.store.save(&stored()).await.unwrap();
        let mut md = stored();
        md.metadata.version = "2.0".into();
        let conflicts =
            crate::conflict::detect_metadata_conflicts(&md, &stored(), &DetectionConfig::default(), model::now());

        let manual = h
            .resolver
            .resolve_conflicts(request(conflicts.clone(), Some(ResolutionStrategy::Manual)))
            .await
            .unwrap();
        assert!(!manual.success);

        let target = h
            .resolver
            .resolve_conflicts(request(conflicts, Some(ResolutionStrategy::UseTarget)))
            .await
            .unwrap();
        assert!(target.success);
        assert_eq!(
            target.resolved_conflicts[0].resolution.as_ref().unwrap().result,
            json!("1.0")
        );
        assert_eq!(h.store.load("plan-1").await.unwrap().metadata.version, "1.0");

        let stats = h.resolver.stats();
        assert_eq!(stats.total_resolutions, 1);
        assert_eq!(stats.manual_resolutions, 1);
        assert_eq!(stats.failed_resolutions, 1);
        h.resolver.reset_stats();
        assert_eq!(h.resolver.stats(), ResolverStats::default());
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let h = fixture(|_| {});
        let err = h
            .resolver
            .resolve_conflicts(ResolutionRequest {
                plan_id: "ghost".into(),
                ..request(Vec::new(), None)
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
