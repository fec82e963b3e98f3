//! `plansync health` and `plansync stats`.

use anyhow::{Context, Result, bail};

use plansync_core::SyncService;
use plansync_core::service::{ComponentHealth, HealthStatus};
use plansync_core::sync::render::format_percent;

fn health_line(component: &ComponentHealth) -> String {
    let status = match component.status {
        HealthStatus::Healthy => "ok",
        HealthStatus::Unhealthy => "unreachable",
        HealthStatus::Disabled => "disabled",
    };
    match &component.detail {
        Some(detail) => format!("{status} ({detail})"),
        None => status.to_owned(),
    }
}

/// Exit non-zero when the store is down; a down vector index only warns.
pub async fn run_health(service: &SyncService) -> Result<()> {
    let report = service.health_check().await;
    println!("Store ({}):        {}", report.store.name, health_line(&report.store));
    println!(
        "Vector index ({}): {}",
        report.vector_index.name,
        health_line(&report.vector_index)
    );

    if !report.healthy {
        bail!("plan store is unavailable");
    }
    Ok(())
}

pub async fn run_stats(service: &SyncService, json: bool) -> Result<()> {
    let stats = service.get_sync_statistics().await?;

    if json {
        let text = serde_json::to_string_pretty(&stats).context("failed to serialize statistics")?;
        println!("{text}");
        return Ok(());
    }

    let store = &stats.store;
    println!("Plans:               {}", store.total_plans);
    println!(
        "Tasks:               {} ({} completed)",
        store.total_tasks, store.completed_tasks
    );
    println!(
        "Average progression: {}%",
        format_percent(store.average_progression)
    );
    println!(
        "Last 24h:            {} operation(s), {} error(s)",
        store.operations_last_24h, store.errors_last_24h
    );
    match store.last_sync_at {
        Some(at) => println!("Last success:        {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last success:        never"),
    }
    println!("Vector index:        {}", health_line(&stats.vector_index));
    Ok(())
}
