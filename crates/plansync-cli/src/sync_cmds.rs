//! Handlers for `plansync sync`, `detect`, `resolve` and `search`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use plansync_core::SyncService;
use plansync_core::conflict::{DetectionResult, ResolutionResult};
use plansync_core::model::{Conflict, ResolutionStrategy};

// -----------------------------------------------------------------------
// plansync sync <plan-id> | --all
// -----------------------------------------------------------------------

/// `plan_id == None` means every stored plan.
pub async fn run_sync(
    service: &SyncService,
    plan_id: Option<&str>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Some(id) = plan_id {
        let path = service.sync_to_markdown(id).await?;
        println!("Plan {id} written to {}", path.display());
        return Ok(());
    }

    let report = service.sync_all_to_markdown(cancel).await?;
    println!(
        "Synchronized {} plan(s), {} failed{}.",
        report.success_count,
        report.error_count,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for (id, reason) in &report.failures {
        println!("  {id}: {reason}");
    }

    if report.error_count > 0 {
        bail!("{} plan(s) failed to synchronize", report.error_count);
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plansync detect <file>
// -----------------------------------------------------------------------

pub async fn run_detect(service: &SyncService, file: &Path, json: bool) -> Result<()> {
    let result = service.detect_conflicts_from_file(file).await?;
    if json {
        print_json(&result)?;
    } else {
        print_detection(&result);
    }
    Ok(())
}

fn print_detection(result: &DetectionResult) {
    if !result.has_conflicts() {
        println!("Plan {}: no conflicts.", result.plan_id);
        return;
    }

    println!(
        "Plan {}: {} conflict(s), highest severity {}",
        result.plan_id,
        result.conflicts.len(),
        result
            .highest_severity()
            .map(|s| s.to_string())
            .unwrap_or_default()
    );
    let by_type: Vec<String> = result
        .by_type()
        .iter()
        .map(|(t, n)| format!("{t}={n}"))
        .collect();
    println!("  {}", by_type.join(" "));
    println!();
    for conflict in &result.conflicts {
        print_conflict(conflict);
    }
}

fn print_conflict(conflict: &Conflict) {
    println!(
        "  [{:<8}] {:<9} {}",
        conflict.severity.to_string(),
        conflict.conflict_type.to_string(),
        conflict.description
    );
    if let Some(resolution) = &conflict.resolution {
        println!(
            "             {} via {}: {}",
            if resolution.applied { "applied" } else { "not applied" },
            resolution.strategy,
            resolution.action
        );
        if let Some(backup) = &resolution.backup_reference {
            println!("             backup: {backup}");
        }
    }
}

// -----------------------------------------------------------------------
// plansync resolve <file>
// -----------------------------------------------------------------------

pub struct ResolveOptions {
    pub strategy: Option<ResolutionStrategy>,
    pub auto: bool,
    pub user: Option<String>,
    pub json: bool,
}

pub async fn run_resolve(service: &SyncService, file: &Path, options: ResolveOptions) -> Result<()> {
    let result = if options.auto {
        service.auto_resolve_from_file(file).await?
    } else {
        service
            .resolve_from_file(file, options.strategy, options.user)
            .await?
    };

    if options.json {
        print_json(&result)?;
    } else {
        print_resolution(&result);
    }

    if !result.success {
        bail!(
            "{} conflict(s) left unresolved for plan {}",
            result.failed_conflicts.len(),
            result.plan_id
        );
    }
    Ok(())
}

fn print_resolution(result: &ResolutionResult) {
    println!(
        "Plan {}: {} resolved, {} unresolved ({} ms)",
        result.plan_id,
        result.resolved_conflicts.len(),
        result.failed_conflicts.len(),
        result.duration.as_millis()
    );
    if let Some(path) = &result.backup_path {
        println!("  Backup: {}", path.display());
    }
    if !result.resolved_conflicts.is_empty() {
        println!();
        println!("Resolved:");
        result.resolved_conflicts.iter().for_each(print_conflict);
    }
    if !result.failed_conflicts.is_empty() {
        println!();
        println!("Unresolved:");
        result.failed_conflicts.iter().for_each(print_conflict);
    }
}

// -----------------------------------------------------------------------
// plansync search <query>
// -----------------------------------------------------------------------

pub async fn run_search(service: &SyncService, query: &str, limit: usize) -> Result<()> {
    let hits = service.search_similar_plans(query, limit).await?;
    if hits.is_empty() {
        println!("No similar plans found.");
        return Ok(());
    }

    println!("{:>6}  {:<24}  TITLE", "SCORE", "PLAN ID");
    for hit in &hits {
        println!(
            "{:>6.3}  {:<24}  {} (v{}, {} tasks)",
            hit.score, hit.plan_id, hit.payload.title, hit.payload.version, hit.payload.task_count
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{text}");
    Ok(())
}
