//! End-to-end workflows over the store, index, converter, synchronizer,
//! detector and resolver. Composition only: the rules live in those
//! components.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::conflict::{
    ConflictDetector, ConflictResolver, DetectionResult, DetectorStats, ResolutionRequest,
    ResolutionResult, ResolverStats,
};
use crate::convert::{Embedder, ForwardConverter, parse_markdown_file};
use crate::index::{ScoredPlanRef, VectorIndex};
use crate::model::{Plan, PlanMetadata, ResolutionStrategy, Task};
use crate::store::{PlanStore, SyncStats};
use crate::sync::{BulkSyncReport, ReverseSynchronizer};

/// Result of [`SyncService::convert_and_store`].
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub plan: Plan,
    /// Non-fatal problems: missing embeddings, index failures.
    pub warnings: Vec<String>,
    pub indexed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(name: &str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                name: name.to_owned(),
                status: HealthStatus::Healthy,
                detail: None,
            },
            Err(e) => Self {
                name: name.to_owned(),
                status: HealthStatus::Unhealthy,
                detail: Some(e.to_string()),
            },
        }
    }

    fn disabled() -> Self {
        Self {
            name: "vector-index".to_owned(),
            status: HealthStatus::Disabled,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// True when the store is reachable. The vector index only degrades
    /// search, so it does not affect this flag.
    pub healthy: bool,
    pub store: ComponentHealth,
    pub vector_index: ComponentHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatistics {
    pub store: SyncStats,
    pub vector_index: ComponentHealth,
    pub detector: DetectorStats,
    pub resolver: ResolverStats,
}

pub struct SyncService {
    store: Arc<dyn PlanStore>,
    index: Option<Arc<dyn VectorIndex>>,
    converter: ForwardConverter,
    synchronizer: ReverseSynchronizer,
    detector: Arc<ConflictDetector>,
    resolver: ConflictResolver,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn PlanStore>,
        index: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        config: &SyncConfig,
    ) -> Self {
        let detector = Arc::new(ConflictDetector::new(
            store.clone(),
            config.detection.clone(),
        ));
        Self {
            converter: ForwardConverter::new(embedder),
            synchronizer: ReverseSynchronizer::new(
                store.clone(),
                config.markdown.clone(),
                config.bulk.clone(),
            ),
            resolver: ConflictResolver::new(
                store.clone(),
                detector.clone(),
                config.resolution.clone(),
            ),
            detector,
            store,
            index,
        }
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    pub fn converter(&self) -> &ForwardConverter {
        &self.converter
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn synchronizer(&self) -> &ReverseSynchronizer {
        &self.synchronizer
    }

    /// Convert, validate, store, then index on a best-effort basis.
    pub async fn convert_and_store(
        &self,
        metadata: PlanMetadata,
        tasks: Vec<Task>,
    ) -> Result<StoreOutcome> {
        let (plan, warnings) = self.converter.convert_to_dynamic(metadata, tasks)?;
        self.store_converted(plan, warnings).await
    }

    /// Read a Markdown plan from disk and [`Self::convert_and_store`] it.
    /// A `*Plan ID: …*` footer keeps the plan's existing identity.
    pub async fn convert_file(&self, path: &Path) -> Result<StoreOutcome> {
        let parsed = parse_markdown_file(path)?;
        let (plan, warnings) = self
            .converter
            .convert_parsed(parsed)
            .with_context(|| format!("cannot convert {}", path.display()))?;
        self.store_converted(plan, warnings).await
    }

    async fn store_converted(&self, plan: Plan, mut warnings: Vec<String>) -> Result<StoreOutcome> {
        self.converter.validate_conversion(&plan)?;
        self.store.save(&plan).await?;
        let indexed = self.index_plan(&plan, &mut warnings).await;
        info!(
            plan_id = %plan.id,
            tasks = plan.tasks.len(),
            indexed,
            warnings = warnings.len(),
            "stored plan"
        );
        Ok(StoreOutcome {
            plan,
            warnings,
            indexed,
        })
    }

    async fn index_plan(&self, plan: &Plan, warnings: &mut Vec<String>) -> bool {
        let Some(index) = &self.index else {
            return false;
        };
        if plan.embeddings.is_empty() {
            warnings.push("plan has no embeddings; skipped vector indexing".to_owned());
            return false;
        }
        let result = match index.ensure_collection().await {
            Ok(()) => index.store_plan_embeddings(plan).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(plan_id = %plan.id, index = index.name(), "vector indexing failed: {e}");
                warnings.push(format!("vector indexing failed: {e}"));
                false
            }
        }
    }

    pub async fn sync_to_markdown(&self, plan_id: &str) -> Result<PathBuf> {
        Ok(self.synchronizer.sync_to_markdown(plan_id).await?)
    }

    pub async fn sync_all_to_markdown(&self, cancel: CancellationToken) -> Result<BulkSyncReport> {
        Ok(self.synchronizer.sync_all_plans_with_cancel(cancel).await?)
    }

    /// Embed `query_text` and search the vector index.
    pub async fn search_similar_plans(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<ScoredPlanRef>> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| anyhow!("vector index is disabled"))?;
        let vector = self
            .converter
            .embedder()
            .embed(query_text)
            .context("failed to embed search query")?;
        Ok(index.search_similar_plans(&vector, limit).await?)
    }

    /// Canonical snapshot of a Markdown file, dated by the file's
    /// modification time.
    pub fn markdown_snapshot(&self, path: &Path) -> Result<Plan> {
        let parsed = parse_markdown_file(path)?;
        let (mut plan, _warnings) = self
            .converter
            .convert_parsed(parsed)
            .with_context(|| format!("cannot convert {}", path.display()))?;

        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("failed to stat {}", path.display()))?;
        plan.updated_at = DateTime::<Utc>::from(modified).trunc_subsecs(6);
        Ok(plan)
    }

    pub async fn detect_conflicts_from_file(&self, path: &Path) -> Result<DetectionResult> {
        let snapshot = self.markdown_snapshot(path)?;
        Ok(self
            .detector
            .detect_conflicts(&snapshot.id, &snapshot)
            .await?)
    }

    pub async fn auto_resolve_from_file(&self, path: &Path) -> Result<ResolutionResult> {
        let snapshot = self.markdown_snapshot(path)?;
        Ok(self
            .resolver
            .auto_resolve_conflicts(&snapshot.id, &snapshot)
            .await?)
    }

    /// Detect conflicts for a Markdown file and resolve all of them with
    /// `strategy` (or the configured per-type choice).
    pub async fn resolve_from_file(
        &self,
        path: &Path,
        strategy: Option<ResolutionStrategy>,
        user: Option<String>,
    ) -> Result<ResolutionResult> {
        let snapshot = self.markdown_snapshot(path)?;
        let detection = self
            .detector
            .detect_conflicts(&snapshot.id, &snapshot)
            .await?;
        let request = ResolutionRequest {
            plan_id: snapshot.id.clone(),
            conflicts: detection.conflicts,
            strategy,
            user,
            source_snapshot: Some(snapshot),
        };
        Ok(self.resolver.resolve_conflicts(request).await?)
    }

    pub fn cleanup_old_backups(&self, max_age: Duration) -> Result<usize> {
        self.resolver.cleanup_old_backups(max_age)
    }

    async fn index_health(&self) -> ComponentHealth {
        match &self.index {
            Some(index) => ComponentHealth::from_result(index.name(), index.health_check().await),
            None => ComponentHealth::disabled(),
        }
    }

    pub async fn health_check(&self) -> HealthReport {
        let store = ComponentHealth::from_result(self.store.name(), self.store.health().await);
        let vector_index = self.index_health().await;
        HealthReport {
            healthy: store.status == HealthStatus::Healthy,
            store,
            vector_index,
        }
    }

    pub async fn get_sync_statistics(&self) -> Result<SyncStatistics> {
        Ok(SyncStatistics {
            store: self.store.stats().await?,
            vector_index: self.index_health().await,
            detector: self.detector.stats(),
            resolver: self.resolver.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::convert::HashingEmbedder;
    use crate::index::{IndexError, MemoryVectorIndex};
    use crate::model::fixtures::task;
    use crate::model::{ConflictType, EMBEDDING_DIM, ValidationError};
    use crate::store::MemoryPlanStore;

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        fn name(&self) -> &str {
            "down"
        }
        async fn ensure_collection(&self) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }
        async fn store_plan_embeddings(&self, _plan: &Plan) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }
        async fn search_similar_plans(
            &self,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<ScoredPlanRef>, IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }
        async fn health_check(&self) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }
    }

    struct Setup {
        service: SyncService,
        store: Arc<MemoryPlanStore>,
        dir: tempfile::TempDir,
    }

    fn setup(index: Option<Arc<dyn VectorIndex>>) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::default();
        config.markdown.output_dir = dir.path().join("out");
        config.resolution.backup_dir = dir.path().join("backups");
        let store = Arc::new(MemoryPlanStore::new());
        let service = SyncService::new(
            store.clone(),
            index,
            Arc::new(HashingEmbedder::default()),
            &config,
        );
        Setup {
            service,
            store,
            dir,
        }
    }

    fn metadata(title: &str, path: &str) -> PlanMetadata {
        PlanMetadata {
            title: title.into(),
            version: "1.0".into(),
            progression: 50.0,
            file_path: path.into(),
            ..PlanMetadata::default()
        }
    }

    fn tasks() -> Vec<Task> {
        vec![
            task("a", "Database schema", "completed", "Phase 1"),
            task("b", "Query layer", "pending", "Phase 1"),
        ]
    }

    #[tokio::test]
    async fn convert_store_and_search() {
        let index = Arc::new(MemoryVectorIndex::new());
        let s = setup(Some(index.clone()));

        let outcome = s
            .service
            .convert_and_store(metadata("Database rollout", "db.md"), tasks())
            .await
            .unwrap();
        assert!(outcome.indexed);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.plan.embeddings.len(), EMBEDDING_DIM);
        assert_eq!(index.len().await, 1);

        let stored = s.store.load(&outcome.plan.id).await.unwrap();
        assert_eq!(stored, outcome.plan);

        let hits = s
            .service
            .search_similar_plans("database schema", 5)
            .await
            .unwrap();
        assert_eq!(hits[0].plan_id, outcome.plan.id);
        assert_eq!(hits[0].payload.title, "Database rollout");
    }

    #[tokio::test]
    async fn index_outage_does_not_block_storage() {
        let s = setup(Some(Arc::new(DownIndex)));
        let outcome = s
            .service
            .convert_and_store(metadata("Roadmap", "r.md"), tasks())
            .await
            .unwrap();
        assert!(!outcome.indexed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(s.store.load(&outcome.plan.id).await.is_ok());

        let health = s.service.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.vector_index.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn invalid_plans_are_not_stored() {
        let s = setup(None);
        let err = s
            .service
            .convert_and_store(metadata("Empty", "e.md"), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::NoTasks(_))
        ));
        assert!(s.store.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_without_index_is_an_error() {
        let s = setup(None);
        assert!(s.service.search_similar_plans("anything", 3).await.is_err());
        let health = s.service.health_check().await;
        assert_eq!(health.vector_index.status, HealthStatus::Disabled);
    }

    #[tokio::test]
    async fn markdown_round_trip_through_the_service() {
        let s = setup(None);
        let source = s.dir.path().join("plan.md");
        std::fs::write(
            &source,
            "# Roadmap\n\n**Version 1.0 - Progression globale : 50%**\n\n## Phase 1\n- [x] Schema\n- [ ] Queries\n",
        )
        .unwrap();

        let stored = s.service.convert_file(&source).await.unwrap().plan;
        let synced = s.service.sync_to_markdown(&stored.id).await.unwrap();
        assert!(synced.starts_with(s.dir.path().join("out")));

        // The synchronized file maps back to the same plan with no conflicts
        // beyond the timestamp.
        let detection = s.service.detect_conflicts_from_file(&synced).await.unwrap();
        assert_eq!(detection.plan_id, stored.id);
        assert!(detection
            .conflicts
            .iter()
            .all(|c| c.conflict_type == ConflictType::Timestamp));
    }

    #[tokio::test]
    async fn auto_resolve_from_edited_file() {
        let s = setup(None);
        let source = s.dir.path().join("plan.md");
        std::fs::write(&source, "# Roadmap\n## Phase 1\n- [ ] Schema\n- [ ] Queries\n").unwrap();
        let stored = s.service.convert_file(&source).await.unwrap().plan;

        std::fs::write(&source, "# Roadmap\n## Phase 1\n- [x] Schema\n- [ ] Queries\n").unwrap();
        let result = s.service.auto_resolve_from_file(&source).await.unwrap();
        assert!(result
            .resolved_conflicts
            .iter()
            .any(|c| c.conflict_type == ConflictType::Tasks));

        let after = s.store.load(&stored.id).await.unwrap();
        let schema = after.tasks.iter().find(|t| t.title == "Schema").unwrap();
        assert_eq!(schema.status, "completed");

        let stats = s.service.get_sync_statistics().await.unwrap();
        assert_eq!(stats.detector.detections, 1);
        assert!(stats.resolver.auto_resolutions >= 1);
        assert_eq!(stats.store.total_plans, 1);
    }

    #[tokio::test]
    async fn bulk_sync_reports_counts() {
        let s = setup(None);
        s.service
            .convert_and_store(metadata("Alpha", "a.md"), tasks())
            .await
            .unwrap();
        s.service
            .convert_and_store(metadata("Beta", "b.md"), tasks())
            .await
            .unwrap();

        let report = s
            .service
            .sync_all_to_markdown(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 0);
    }
}
