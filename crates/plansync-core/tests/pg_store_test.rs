//! Integration tests for the PostgreSQL plan store.
//!
//! Requires Docker (testcontainers) or `PLANSYNC_TEST_PG_URL` pointing at a
//! running PostgreSQL. Each test gets its own database.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use plansync_core::SyncService;
use plansync_core::config::SyncConfig;
use plansync_core::convert::{ForwardConverter, HashingEmbedder};
use plansync_core::model::{self, EMBEDDING_DIM, Plan, PlanMetadata, Task};
use plansync_core::store::{PgPlanStore, PlanStore, StoreError};
use plansync_db::models::{LogStatus, SyncOperation};
use plansync_db::queries::sync_logs;
use plansync_test_utils::TestDb;

fn task(id: &str, title: &str, status: &str, phase: &str) -> Task {
    let now = model::now();
    Task {
        id: id.to_owned(),
        title: title.to_owned(),
        description: format!("{title} details"),
        status: status.to_owned(),
        phase: phase.to_owned(),
        level: 1,
        priority: "high".to_owned(),
        completed: status == model::STATUS_COMPLETED,
        dependencies: vec!["setup".to_owned()],
        created_at: now,
        updated_at: now,
    }
}

fn sample_plan(file_path: &str) -> Plan {
    let metadata = PlanMetadata {
        title: "Database rollout".to_owned(),
        version: "2.1".to_owned(),
        date: "2025-03-01".to_owned(),
        description: "Move everything to PostgreSQL".to_owned(),
        progression: 33.3,
        file_path: file_path.to_owned(),
    };
    let tasks = vec![
        task("t-1", "Schema", "completed", "Phase 1"),
        task("t-2", "Queries", "in_progress", "Phase 1"),
        task("t-3", "Cutover", "pending", "Phase 2"),
    ];
    let (plan, warnings) = ForwardConverter::new(Arc::new(HashingEmbedder::default()))
        .convert_to_dynamic(metadata, tasks)
        .unwrap();
    assert!(warnings.is_empty());
    plan
}

#[tokio::test]
async fn save_and_load_round_trip() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());

    let plan = sample_plan("plans/rollout.md");
    store.save(&plan).await.unwrap();
    let loaded = store.load(&plan.id).await.unwrap();

    assert_eq!(loaded, plan);
    assert_eq!(loaded.embeddings.len(), EMBEDDING_DIM);
    assert_eq!(loaded.metadata.date, "2025-03-01");
    assert_eq!(loaded.tasks[1].dependencies, ["setup"]);

    db.drop_db().await;
}

#[tokio::test]
async fn resave_replaces_tasks_and_keeps_created_at() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());

    let plan = sample_plan("plans/rollout.md");
    store.save(&plan).await.unwrap();

    let mut edited = plan.clone();
    edited.tasks.remove(0);
    edited.tasks.reverse();
    edited.created_at = DateTime::<Utc>::UNIX_EPOCH;
    edited.updated_at = model::now();
    store.save(&edited).await.unwrap();

    let loaded = store.load(&plan.id).await.unwrap();
    let ids: Vec<&str> = loaded.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["t-3", "t-2"]);
    assert_eq!(loaded.created_at, plan.created_at);

    db.drop_db().await;
}

#[tokio::test]
async fn missing_plan_is_not_found_and_audited() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());

    let err = store.load("plan-missing").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(ref id) if id == "plan-missing"));

    let (total, errors) =
        sync_logs::count_logs_since(&db.pool, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
    assert_eq!((total, errors), (1, 1));

    db.drop_db().await;
}

#[tokio::test]
async fn stats_reflect_store_contents() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());

    let empty = store.stats().await.unwrap();
    assert_eq!(empty.total_plans, 0);
    assert_eq!(empty.last_sync_at, None);

    let plan = sample_plan("plans/rollout.md");
    store.save(&plan).await.unwrap();
    store.load(&plan.id).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_plans, 1);
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.completed_tasks, 1);
    assert!((stats.average_progression - 33.3).abs() < 1e-9);
    assert_eq!(stats.operations_last_24h, 2);
    assert_eq!(stats.errors_last_24h, 0);
    assert!(stats.last_sync_at.is_some());

    let logs = sync_logs::list_logs_for_plan(&db.pool, &plan.id, 10)
        .await
        .unwrap();
    assert_eq!(logs[0].operation, SyncOperation::GetPlan);
    assert_eq!(logs[1].operation, SyncOperation::StorePlan);
    assert!(logs.iter().all(|l| l.status == LogStatus::Success));

    db.drop_db().await;
}

#[tokio::test]
async fn health_and_listing() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());

    store.health().await.unwrap();
    let a = sample_plan("plans/a.md");
    let mut b = sample_plan("plans/b.md");
    b.updated_at = a.updated_at + chrono::Duration::seconds(5);
    store.save(&a).await.unwrap();
    store.save(&b).await.unwrap();

    assert_eq!(store.list_ids().await.unwrap(), [b.id.clone(), a.id.clone()]);

    db.drop_db().await;
}

#[tokio::test]
async fn service_over_postgres() {
    let db = TestDb::create().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = SyncConfig::default();
    config.markdown.output_dir = dir.path().join("out");
    config.resolution.backup_dir = dir.path().join("backups");
    let service = SyncService::new(
        Arc::new(PgPlanStore::new(db.pool.clone())),
        None,
        Arc::new(HashingEmbedder::default()),
        &config,
    );

    let source = dir.path().join("rollout.md");
    std::fs::write(
        &source,
        "# Rollout\n\n**Version 1.0 - Progression globale : 0%**\n\n## Phase 1\n- [ ] Schema\n- [ ] Queries\n",
    )
    .unwrap();
    let stored = service.convert_file(&source).await.unwrap().plan;

    std::fs::write(
        &source,
        "# Rollout\n\n**Version 1.0 - Progression globale : 0%**\n\n## Phase 1\n- [x] Schema\n- [ ] Queries\n",
    )
    .unwrap();
    let detection = service.detect_conflicts_from_file(&source).await.unwrap();
    assert!(detection.has_conflicts());

    let result = service.auto_resolve_from_file(&source).await.unwrap();
    assert!(!result.resolved_conflicts.is_empty());

    let synced = service.sync_to_markdown(&stored.id).await.unwrap();
    let text = std::fs::read_to_string(synced).unwrap();
    assert!(text.contains("- [x] Schema"));

    let stats = service.get_sync_statistics().await.unwrap();
    assert!(stats.store.operations_last_24h >= 4);

    db.drop_db().await;
}
