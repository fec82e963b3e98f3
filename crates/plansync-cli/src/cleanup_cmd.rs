//! `plansync cleanup-backups`: prune old conflict-resolution snapshots.

use std::time::Duration;

use anyhow::Result;

use plansync_core::SyncService;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub fn run_cleanup_backups(service: &SyncService, older_than_days: u64) -> Result<()> {
    let max_age = Duration::from_secs(older_than_days.saturating_mul(SECS_PER_DAY));
    let removed = service.cleanup_old_backups(max_age)?;
    println!(
        "Removed {removed} backup(s) older than {older_than_days} day(s) from {}.",
        service.resolver().config().backup_dir.display()
    );
    Ok(())
}
