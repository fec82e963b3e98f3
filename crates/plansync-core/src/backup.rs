//! Backup artifacts and atomic file writes.
//!
//! Two kinds of backups exist:
//!
//! - a sibling copy `<file>.backup.<YYYYMMDD-HHMMSS>` taken before a
//!   synchronized Markdown file is overwritten;
//! - a directory `backup_<planId>_<timestamp>/` holding `plan_backup.json`,
//!   or `backup_<planId>_<timestamp>_both/` holding `markdown.json` and
//!   `dynamic.json` for a backup-both resolution.
//!
//! Backup directories are the only artifacts this crate ever deletes, via
//! [`cleanup_old_backups`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{Plan, is_path_safe_id};

pub const PLAN_BACKUP_FILE: &str = "plan_backup.json";
pub const MARKDOWN_SNAPSHOT_FILE: &str = "markdown.json";
pub const DYNAMIC_SNAPSHOT_FILE: &str = "dynamic.json";

const BACKUP_DIR_PREFIX: &str = "backup_";

/// Write `contents` to `<path>.tmp` and rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| {
        format!("failed to move {} into place at {}", tmp.display(), path.display())
    })?;
    Ok(())
}

/// Copy `path` to `<path>.backup.<YYYYMMDD-HHMMSS>`.
pub fn backup_file(path: &Path, at: DateTime<Utc>) -> Result<PathBuf> {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".backup.{}", at.format("%Y%m%d-%H%M%S")));
    let target = PathBuf::from(name);

    std::fs::copy(path, &target).with_context(|| {
        format!("failed to back up {} to {}", path.display(), target.display())
    })?;
    debug!(source = %path.display(), backup = %target.display(), "backed up file");
    Ok(target)
}

/// `<root>/backup_<planId>_<timestamp>`, created if missing.
pub fn plan_backup_dir(root: &Path, plan_id: &str, at: DateTime<Utc>) -> Result<PathBuf> {
    create_backup_dir(root, plan_id, at, "")
}

fn create_backup_dir(root: &Path, plan_id: &str, at: DateTime<Utc>, suffix: &str) -> Result<PathBuf> {
    anyhow::ensure!(
        is_path_safe_id(plan_id),
        "plan id {plan_id:?} cannot be used in a backup path"
    );
    let dir = root.join(format!(
        "{BACKUP_DIR_PREFIX}{plan_id}_{}{suffix}",
        at.format("%Y%m%d-%H%M%S-%6f")
    ));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create backup directory {}", dir.display()))?;
    Ok(dir)
}

fn write_snapshot(dir: &Path, file: &str, plan: &Plan) -> Result<PathBuf> {
    let path = dir.join(file);
    write_atomic(&path, &plan.serialize()?)?;
    Ok(path)
}

/// Full JSON snapshot of a stored plan. Returns the backup directory.
pub fn backup_plan(root: &Path, plan: &Plan, at: DateTime<Utc>) -> Result<PathBuf> {
    let dir = plan_backup_dir(root, &plan.id, at)?;
    write_snapshot(&dir, PLAN_BACKUP_FILE, plan)?;
    debug!(plan_id = %plan.id, dir = %dir.display(), "wrote plan backup");
    Ok(dir)
}

/// Both sides of a conflict, side by side, in
/// `backup_<planId>_<timestamp>_both`. Returns the backup directory.
pub fn backup_both(
    root: &Path,
    markdown: &Plan,
    dynamic: &Plan,
    at: DateTime<Utc>,
) -> Result<PathBuf> {
    let dir = create_backup_dir(root, &dynamic.id, at, "_both")?;
    write_snapshot(&dir, MARKDOWN_SNAPSHOT_FILE, markdown)?;
    write_snapshot(&dir, DYNAMIC_SNAPSHOT_FILE, dynamic)?;
    Ok(dir)
}

/// Read back a snapshot written by this module.
pub fn read_snapshot(path: &Path) -> Result<Plan> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read backup {}", path.display()))?;
    Plan::deserialize(&bytes).with_context(|| format!("corrupt backup {}", path.display()))
}

/// Remove backup directories under `root` last modified more than
/// `max_age` ago. A missing `root` means nothing to clean.
pub fn cleanup_old_backups(root: &Path, max_age: Duration) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("failed to list backups in {}", root.display()))?;
    for entry in entries {
        let entry = entry.context("failed to read backup entry")?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(BACKUP_DIR_PREFIX) {
            continue;
        }
        let meta = entry.metadata().context("failed to stat backup entry")?;
        if !meta.is_dir() {
            continue;
        }
        let modified = meta.modified().context("backup has no modification time")?;
        if modified < cutoff {
            std::fs::remove_dir_all(entry.path()).with_context(|| {
                format!("failed to remove backup {}", entry.path().display())
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}
