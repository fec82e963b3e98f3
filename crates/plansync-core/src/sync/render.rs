//! Canonical plan to Markdown text.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::{Plan, Task};

/// Order given to phases no pattern recognises.
pub const UNKNOWN_PHASE_ORDER: u32 = 999;

/// `(pattern, order)` pairs tried in sequence; the first match wins.
///
/// Best effort only: a phase named "Phase 3" sorts third, but a phase the
/// table does not know about ("Backlog", "Phase 12") sorts last, by name.
const PHASE_ORDER_TABLE: &[(&str, u32)] = &[
    (r"(?i)^phase\s+(1|i)\b", 1),
    (r"(?i)^phase\s+(2|ii)\b", 2),
    (r"(?i)^phase\s+(3|iii)\b", 3),
    (r"(?i)^phase\s+(4|iv)\b", 4),
    (r"(?i)^phase\s+(5|v)\b", 5),
    (r"(?i)^phase\s+(6|vi)\b", 6),
    (r"(?i)^phase\s+(7|vii)\b", 7),
    (r"(?i)^phase\s+(8|viii)\b", 8),
    (r"^1\s*[.):-]", 1),
    (r"^2\s*[.):-]", 2),
    (r"^3\s*[.):-]", 3),
    (r"^4\s*[.):-]", 4),
    (r"^5\s*[.):-]", 5),
    (r"^6\s*[.):-]", 6),
    (r"^7\s*[.):-]", 7),
    (r"^8\s*[.):-]", 8),
];

static PHASE_ORDER: LazyLock<Vec<(Regex, u32)>> = LazyLock::new(|| {
    PHASE_ORDER_TABLE
        .iter()
        .map(|(pattern, order)| (Regex::new(pattern).unwrap(), *order))
        .collect()
});

/// Display order of a phase heading, [`UNKNOWN_PHASE_ORDER`] when no
/// pattern matches.
pub fn phase_order(phase: &str) -> u32 {
    let phase = phase.trim();
    PHASE_ORDER
        .iter()
        .find(|(re, _)| re.is_match(phase))
        .map_or(UNKNOWN_PHASE_ORDER, |(_, order)| *order)
}

/// Tasks of one phase, in display order.
#[derive(Debug)]
pub struct PhaseGroup<'a> {
    pub name: &'a str,
    pub order: u32,
    pub tasks: Vec<&'a Task>,
}

impl PhaseGroup<'_> {
    /// Completed share of this phase, 0 for an empty phase.
    pub fn progression(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let done = self.tasks.iter().filter(|t| t.completed).count();
        done as f64 / self.tasks.len() as f64 * 100.0
    }
}

/// Group tasks by phase (empty phase => "General"), order the groups by
/// [`phase_order`] then name, and each group's tasks by level then
/// creation time. Both sorts are stable.
pub fn group_by_phase(plan: &Plan) -> Vec<PhaseGroup<'_>> {
    let mut groups: BTreeMap<&str, Vec<&Task>> = BTreeMap::new();
    for task in &plan.tasks {
        groups.entry(task.phase_or_general()).or_default().push(task);
    }

    let mut groups: Vec<PhaseGroup<'_>> = groups
        .into_iter()
        .map(|(name, mut tasks)| {
            tasks.sort_by(|a, b| {
                a.level
                    .cmp(&b.level)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
            PhaseGroup {
                name,
                order: phase_order(name),
                tasks,
            }
        })
        .collect();
    groups.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(b.name)));
    groups
}

/// `40`, `33.3`: whole numbers without decimals, otherwise one decimal.
pub fn format_percent(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a plan. Output depends only on the plan and `synced_at`, which
/// appears in the footer alone.
pub fn render_plan(plan: &Plan, synced_at: DateTime<Utc>) -> String {
    let meta = &plan.metadata;
    let mut out = String::new();

    let _ = writeln!(out, "# {}", single_line(&meta.title));
    out.push('\n');

    if !meta.version.is_empty() {
        let mut summary = format!("Version {}", single_line(&meta.version));
        if !meta.date.is_empty() {
            let _ = write!(summary, " - {}", single_line(&meta.date));
        }
        let _ = write!(
            summary,
            " - Progression globale : {}%",
            format_percent(meta.progression)
        );
        let _ = writeln!(out, "**{summary}**");
        out.push('\n');
    }

    if !meta.description.trim().is_empty() {
        let _ = writeln!(out, "{}", meta.description.trim());
        out.push('\n');
    }

    for group in group_by_phase(plan) {
        let _ = writeln!(out, "## {}", group.name);
        let _ = writeln!(out, "*Progression: {}%*", format_percent(group.progression()));
        out.push('\n');

        for task in &group.tasks {
            let indent = "  ".repeat(task.level.saturating_sub(1) as usize);
            let mark = if task.completed { 'x' } else { ' ' };
            let _ = write!(out, "{indent}- [{mark}] {}", single_line(&task.title));
            if !task.description.trim().is_empty() {
                let _ = write!(out, ": {}", single_line(&task.description));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str("---\n");
    let _ = writeln!(
        out,
        "*Synchronisé depuis le système dynamique le {}*",
        synced_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "*Plan ID: {}*", plan.id);
    out
}
