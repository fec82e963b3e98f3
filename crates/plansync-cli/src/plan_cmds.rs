//! Handlers for `plansync convert` and `plansync show`.

use std::path::PathBuf;

use anyhow::{Result, bail};

use plansync_core::SyncService;
use plansync_core::model::Plan;
use plansync_core::sync::group_by_phase;
use plansync_core::sync::render::format_percent;

// -----------------------------------------------------------------------
// plansync convert <file>...
// -----------------------------------------------------------------------

/// Convert and store each file, continuing past failures.
pub async fn run_convert(service: &SyncService, files: &[PathBuf]) -> Result<()> {
    let mut failed = 0usize;

    for file in files {
        match service.convert_file(file).await {
            Ok(outcome) => {
                let plan = &outcome.plan;
                println!("Stored {} ({})", plan.metadata.title, file.display());
                println!("  Plan ID:     {}", plan.id);
                println!("  Version:     {}", display_or_dash(&plan.metadata.version));
                println!("  Tasks:       {}", plan.tasks.len());
                println!("  Progression: {}%", format_percent(plan.metadata.progression));
                println!("  Indexed:     {}", if outcome.indexed { "yes" } else { "no" });
                for w in &outcome.warnings {
                    println!("  warning: {w}");
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("Failed to convert {}: {e:#}", file.display());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} file(s) failed to convert", files.len());
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plansync show [plan-id]
// -----------------------------------------------------------------------

pub async fn run_show(service: &SyncService, plan_id: Option<&str>) -> Result<()> {
    match plan_id {
        Some(id) => show_one(service, id).await,
        None => show_all(service).await,
    }
}

async fn show_all(service: &SyncService) -> Result<()> {
    let ids = service.store().list_ids().await?;
    if ids.is_empty() {
        println!("No plans found. Use `plansync convert <file>` to add one.");
        return Ok(());
    }

    let mut plans = Vec::with_capacity(ids.len());
    for id in &ids {
        plans.push(service.store().load(id).await?);
    }

    let id_w = plans.iter().map(|p| p.id.len()).max().unwrap_or(2).max(2);
    let title_w = plans
        .iter()
        .map(|p| p.metadata.title.chars().count())
        .max()
        .unwrap_or(5)
        .max(5);

    println!(
        "{:<id_w$}  {:<title_w$}  {:<8}  {:>5}  {:>8}  UPDATED",
        "ID", "TITLE", "VERSION", "TASKS", "PROGRESS",
    );
    for plan in &plans {
        println!(
            "{:<id_w$}  {:<title_w$}  {:<8}  {:>5}  {:>7}%  {}",
            plan.id,
            plan.metadata.title,
            display_or_dash(&plan.metadata.version),
            plan.tasks.len(),
            format_percent(plan.metadata.progression),
            plan.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

async fn show_one(service: &SyncService, plan_id: &str) -> Result<()> {
    let plan = service.store().load(plan_id).await?;
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!("Plan: {}", plan.metadata.title);
    println!("  ID:          {}", plan.id);
    println!("  Version:     {}", display_or_dash(&plan.metadata.version));
    println!("  Date:        {}", display_or_dash(&plan.metadata.date));
    println!("  Source:      {}", plan.metadata.file_path);
    println!(
        "  Progression: {}% ({}/{} tasks completed)",
        format_percent(plan.metadata.progression),
        plan.completed_count(),
        plan.tasks.len()
    );
    println!(
        "  Updated:     {}",
        plan.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Embeddings:  {}",
        if plan.embeddings.is_empty() {
            "none".to_owned()
        } else {
            format!("{} dimensions", plan.embeddings.len())
        }
    );

    for group in group_by_phase(plan) {
        println!();
        println!("{} ({}%)", group.name, format_percent(group.progression()));
        for task in &group.tasks {
            let indent = "  ".repeat(task.level.max(1) as usize);
            println!("{indent}[{}] {}", task.status, task.title);
        }
    }
}

fn display_or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
