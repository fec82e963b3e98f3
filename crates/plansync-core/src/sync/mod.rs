//! Reverse synchronization: stored plans back to Markdown files.

pub mod render;
pub mod slug;

pub use render::{PhaseGroup, group_by_phase, phase_order, render_plan};
pub use slug::slugify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use plansync_db::models::SyncOperation;

use crate::backup;
use crate::config::{BulkConfig, MarkdownConfig};
use crate::model::{self, Plan};
use crate::store::{OperationLog, PlanStore, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("plan {0} not found")]
    NotFound(String),

    #[error("refusing to overwrite existing file {}", .0.display())]
    TargetExists(PathBuf),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("file error: {0:#}")]
    Io(anyhow::Error),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Storage(e) => Self::Storage(e),
        }
    }
}

/// Tally of a best-effort bulk sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSyncReport {
    pub success_count: usize,
    pub error_count: usize,
    /// `(plan_id, reason)` for every failed plan, sorted by id.
    pub failures: Vec<(String, String)>,
    /// Set when the run was cancelled before every plan was attempted.
    pub cancelled: bool,
}

pub struct ReverseSynchronizer {
    store: Arc<dyn PlanStore>,
    config: MarkdownConfig,
    bulk: BulkConfig,
}

impl ReverseSynchronizer {
    pub fn new(store: Arc<dyn PlanStore>, config: MarkdownConfig, bulk: BulkConfig) -> Self {
        Self {
            store,
            config,
            bulk,
        }
    }

    pub fn config(&self) -> &MarkdownConfig {
        &self.config
    }

    /// `<output_dir>/<slug(title)>-v<slug(version)>.md`. Falls back to the
    /// slugged plan id when the title has no usable characters.
    pub fn output_path(&self, plan: &Plan) -> PathBuf {
        let mut stem = slugify(&plan.metadata.title);
        if stem.is_empty() {
            stem = slugify(&plan.id);
        }
        if stem.is_empty() {
            stem = "plan".to_owned();
        }
        let version = slugify(&plan.metadata.version);
        if !version.is_empty() {
            stem.push_str("-v");
            stem.push_str(&version);
        }
        self.config.output_dir.join(format!("{stem}.md"))
    }

    /// Write one stored plan to its Markdown file. Returns the path written.
    pub async fn sync_to_markdown(&self, plan_id: &str) -> Result<PathBuf, SyncError> {
        let started = Instant::now();
        let result = self.sync_inner(plan_id).await;
        self.store
            .log_operation(OperationLog::from_result(
                plan_id,
                SyncOperation::SyncMarkdown,
                &result,
                started.elapsed(),
            ))
            .await;
        result
    }

    async fn sync_inner(&self, plan_id: &str) -> Result<PathBuf, SyncError> {
        let plan = self.store.load(plan_id).await?;
        let path = self.output_path(&plan);
        let now = model::now();

        if path.exists() {
            if !self.config.overwrite_existing {
                return Err(SyncError::TargetExists(path));
            }
            if self.config.backup_existing {
                match backup::backup_file(&path, now) {
                    Ok(copy) => info!(plan_id, backup = %copy.display(), "backed up markdown"),
                    Err(e) => warn!(
                        plan_id,
                        path = %path.display(),
                        "markdown backup failed, overwriting anyway: {e:#}"
                    ),
                }
            }
        }

        let content = render_plan(&plan, now);
        backup::write_atomic(&path, content.as_bytes()).map_err(SyncError::Io)?;
        info!(plan_id, path = %path.display(), tasks = plan.tasks.len(), "synchronized plan to markdown");
        Ok(path)
    }

    /// Sync every stored plan; see [`Self::sync_all_plans_with_cancel`].
    pub async fn sync_all_plans(&self) -> Result<BulkSyncReport, SyncError> {
        self.sync_all_plans_with_cancel(CancellationToken::new())
            .await
    }

    /// Sync every stored plan, continuing past failures.
    ///
    /// Each plan gets its own deadline; at most `max_concurrency` run at
    /// once. Only failing to list the plans is an error. Once `cancel`
    /// fires, plans not yet started are skipped and in-flight ones are
    /// abandoned; both count as failures.
    pub async fn sync_all_plans_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<BulkSyncReport, SyncError> {
        let ids = self.store.list_ids().await?;
        let deadline = self.bulk.per_item_timeout();
        let total = ids.len();

        let outcomes: Vec<(String, Result<PathBuf, String>)> = stream::iter(ids)
            .map(|id| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (id, Err("cancelled".to_owned()));
                    }
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => Err("cancelled".to_owned()),
                        r = tokio::time::timeout(deadline, self.sync_to_markdown(&id)) => match r {
                            Ok(Ok(path)) => Ok(path),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(_) => Err(format!("timed out after {}s", deadline.as_secs())),
                        },
                    };
                    (id, outcome)
                }
            })
            .buffer_unordered(self.bulk.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = BulkSyncReport {
            cancelled: cancel.is_cancelled(),
            ..BulkSyncReport::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.success_count += 1,
                Err(reason) => {
                    warn!(plan_id = %id, "plan sync failed: {reason}");
                    report.error_count += 1;
                    report.failures.push((id, reason));
                }
            }
        }
        report.failures.sort();

        info!(
            total,
            succeeded = report.success_count,
            failed = report.error_count,
            "bulk markdown sync finished"
        );
        Ok(report)
    }
}
