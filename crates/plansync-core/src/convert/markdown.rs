//! Markdown plan reader.
//!
//! Turns a checklist-style Markdown plan into [`PlanMetadata`] plus
//! [`Task`] records. Understands the layout written by the reverse
//! synchronizer, so a synchronized file reads back to the same plan:
//!
//! ```markdown
//! # Roadmap
//!
//! **Version 2.1 - 2025-03-01 - Progression globale : 40%**
//!
//! Optional description paragraph.
//!
//! ## Phase 1: Foundations
//! *Progression: 50%*
//!
//! - [x] Schema: tables and indexes
//!   - [ ] Migrations
//!
//! *Plan ID: plan-0123456789abcdef*
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::model::{self, GENERAL_PHASE, PlanMetadata, STATUS_COMPLETED, STATUS_PENDING, Task};

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+?)\s*$").unwrap());
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{2,6}\s+(.+?)\s*#*\s*$").unwrap());
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)[-*+]\s+\[([ xX])\]\s+(.*?)\s*$").unwrap());
static NUMBERING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*[\d.]+\*\*\s*").unwrap());
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*\*(.+)\*\*$").unwrap());
static PROGRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^progression(?: globale)?\s*:\s*([\d.]+)\s*%$").unwrap());
static PHASE_PROGRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*Progression\s*:\s*[\d.]+\s*%\*$").unwrap());
static PLAN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*Plan ID:\s*(\S+?)\*$").unwrap());
static FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*Synchronisé depuis ").unwrap());

/// Result of reading one Markdown plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlan {
    pub metadata: PlanMetadata,
    pub tasks: Vec<Task>,
    /// Id recorded in the footer of a synchronized file.
    pub plan_id: Option<String>,
}

/// Read a plan from disk.
pub fn parse_markdown_file(path: &Path) -> Result<ParsedPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read markdown plan {}", path.display()))?;
    Ok(parse_markdown(&content, &path.to_string_lossy()))
}

/// Read a plan from Markdown text. `file_path` is recorded in the metadata.
///
/// Never fails: missing pieces are left empty and surface later through
/// validation.
pub fn parse_markdown(content: &str, file_path: &str) -> ParsedPlan {
    let now = model::now();
    let mut metadata = PlanMetadata {
        file_path: file_path.to_owned(),
        ..PlanMetadata::default()
    };
    let mut progression: Option<f64> = None;
    let mut description: Vec<&str> = Vec::new();
    let mut plan_id = None;
    let mut phase = String::new();
    let mut seen_heading = false;
    let mut tasks = Vec::new();
    let mut occurrences: HashMap<(String, String), usize> = HashMap::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(caps) = TASK_RE.captures(line) {
            let indent = caps[1]
                .chars()
                .map(|c| if c == '\t' { 4 } else { 1 })
                .sum::<usize>();
            let completed = !caps[2].trim().is_empty();
            let text = NUMBERING_RE.replace(&caps[3], "");
            let (title, task_description) = match text.split_once(": ") {
                Some((t, d)) => (t.trim().to_owned(), d.trim().to_owned()),
                None => (text.trim().to_owned(), String::new()),
            };

            let n = occurrences
                .entry((phase.clone(), title.clone()))
                .or_insert(0);
            let id = task_id(&phase, &title, *n);
            *n += 1;

            tasks.push(Task {
                id,
                title,
                description: task_description,
                status: if completed { STATUS_COMPLETED } else { STATUS_PENDING }.to_owned(),
                phase: phase.clone(),
                level: (indent / 2) as u32 + 1,
                priority: String::new(),
                completed,
                dependencies: Vec::new(),
                created_at: now,
                updated_at: now,
            });
            continue;
        }

        if let Some(caps) = PLAN_ID_RE.captures(trimmed) {
            plan_id = Some(caps[1].to_owned());
            continue;
        }
        if FOOTER_RE.is_match(trimmed) || PHASE_PROGRESSION_RE.is_match(trimmed) {
            continue;
        }

        if metadata.title.is_empty() {
            if let Some(caps) = TITLE_RE.captures(trimmed) {
                metadata.title = caps[1].to_owned();
                continue;
            }
        }

        if let Some(caps) = HEADING_RE.captures(trimmed) {
            // "General" is how the synchronizer renders phase-less tasks.
            phase = if &caps[1] == GENERAL_PHASE {
                String::new()
            } else {
                caps[1].to_owned()
            };
            seen_heading = true;
            continue;
        }

        if seen_heading || metadata.title.is_empty() {
            continue;
        }

        if let Some(caps) = SUMMARY_RE.captures(trimmed) {
            if parse_summary(&caps[1], &mut metadata, &mut progression) {
                continue;
            }
        }

        if !trimmed.is_empty() && trimmed != "---" {
            description.push(trimmed);
        }
    }

    metadata.description = description.join("\n");
    metadata.progression = progression.unwrap_or_else(|| {
        if tasks.is_empty() {
            0.0
        } else {
            let done = tasks.iter().filter(|t| t.completed).count();
            done as f64 / tasks.len() as f64 * 100.0
        }
    });

    ParsedPlan {
        metadata,
        tasks,
        plan_id,
    }
}

/// Parse `Version v - date - Progression globale : p%`. Returns false when
/// the line is not a summary line.
fn parse_summary(inner: &str, metadata: &mut PlanMetadata, progression: &mut Option<f64>) -> bool {
    let parts: Vec<&str> = inner.split(" - ").map(str::trim).collect();
    let Some(version) = parts.first().and_then(|p| p.strip_prefix("Version ")) else {
        return false;
    };
    metadata.version = version.trim().to_owned();

    for part in &parts[1..] {
        if let Some(caps) = PROGRESSION_RE.captures(part) {
            *progression = caps[1].parse().ok();
        } else if metadata.date.is_empty() {
            metadata.date = (*part).to_owned();
        }
    }
    true
}

/// Order-independent task id: stable as long as the phase and title are.
fn task_id(phase: &str, title: &str, occurrence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phase.as_bytes());
    hasher.update([0x1f]);
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(occurrence.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("task-{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Plan de développement RAG

**Version 2.1 - 2025-03-01 - Progression globale : 40%**

Bring retrieval into the CLI.
Second line.

## Phase 1: Foundations

- [x] **1.1** Schema: tables and indexes
  - [ ] Migrations
- [X] Pool

## Phase 2: Search
*Progression: 0%*

* [ ] Embeddings: 384 dimensions

---
*Synchronisé depuis le système dynamique le 2025-03-01 10:00:00*
*Plan ID: plan-abc*
";

    #[test]
    fn reads_metadata() {
        let parsed = parse_markdown(SAMPLE, "docs/rag.md");
        let m = &parsed.metadata;
        assert_eq!(m.title, "Plan de développement RAG");
        assert_eq!(m.version, "2.1");
        assert_eq!(m.date, "2025-03-01");
        assert_eq!(m.progression, 40.0);
        assert_eq!(m.description, "Bring retrieval into the CLI.\nSecond line.");
        assert_eq!(m.file_path, "docs/rag.md");
        assert_eq!(parsed.plan_id.as_deref(), Some("plan-abc"));
    }

    #[test]
    fn reads_tasks_with_levels_and_phases() {
        let parsed = parse_markdown(SAMPLE, "docs/rag.md");
        let t = &parsed.tasks;
        assert_eq!(t.len(), 4);

        assert_eq!(t[0].title, "Schema");
        assert_eq!(t[0].description, "tables and indexes");
        assert_eq!(t[0].phase, "Phase 1: Foundations");
        assert!(t[0].completed);
        assert_eq!(t[0].status, "completed");
        assert_eq!(t[0].level, 1);

        assert_eq!(t[1].title, "Migrations");
        assert_eq!(t[1].level, 2);
        assert!(!t[1].completed);
        assert_eq!(t[1].status, "pending");

        assert!(t[2].completed);
        assert_eq!(t[3].phase, "Phase 2: Search");
        assert_eq!(t[3].description, "384 dimensions");
    }

    #[test]
    fn task_ids_ignore_order_and_status() {
        let a = parse_markdown("# P\n## X\n- [ ] One\n- [ ] Two\n", "p.md");
        let b = parse_markdown("# P\n## X\n- [x] Two\n- [ ] One\n", "p.md");
        assert_eq!(a.tasks[0].id, b.tasks[1].id);
        assert_eq!(a.tasks[1].id, b.tasks[0].id);
        assert!(a.tasks[0].id.starts_with("task-"));
    }

    #[test]
    fn duplicate_titles_get_distinct_ids() {
        let p = parse_markdown("# P\n- [ ] Review\n- [ ] Review\n", "p.md");
        assert_eq!(p.tasks.len(), 2);
        assert_ne!(p.tasks[0].id, p.tasks[1].id);
        assert_eq!(p.tasks[0].phase, "");
    }

    #[test]
    fn progression_falls_back_to_checkboxes() {
        let p = parse_markdown("# P\n- [x] A\n- [ ] B\n- [ ] C\n- [x] D\n", "p.md");
        assert_eq!(p.metadata.progression, 50.0);
        assert!(p.plan_id.is_none());
    }

    #[test]
    fn general_heading_means_no_phase() {
        let p = parse_markdown("# P\n## General\n- [ ] Loose end\n", "p.md");
        let q = parse_markdown("# P\n- [ ] Loose end\n", "p.md");
        assert_eq!(p.tasks[0].phase, "");
        assert_eq!(p.tasks[0].id, q.tasks[0].id);
    }

    #[test]
    fn empty_document() {
        let p = parse_markdown("", "p.md");
        assert!(p.metadata.title.is_empty());
        assert!(p.tasks.is_empty());
        assert_eq!(p.metadata.progression, 0.0);
    }
}
