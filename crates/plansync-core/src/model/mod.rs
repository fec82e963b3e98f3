//! Canonical plan model shared by every component.
//!
//! A [`Plan`] is the structured ("dynamic") form of a Markdown development
//! plan. Both sides of a synchronization are expressed in this form before
//! they are compared.

mod conflict;
mod validate;

pub use conflict::{
    Conflict, ConflictResolution, ConflictType, ParseConflictEnumError, ResolutionStrategy,
    Severity,
};
pub use validate::{ValidationError, is_path_safe_id, validate_plan};

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Dimension of every plan embedding.
pub const EMBEDDING_DIM: usize = 384;

/// Phase label used for tasks without a phase.
pub const GENERAL_PHASE: &str = "General";

/// Status string of a finished task.
pub const STATUS_COMPLETED: &str = "completed";

/// Status string of a task that has not been finished.
pub const STATUS_PENDING: &str = "pending";

/// Current time truncated to microseconds, the resolution Postgres keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Plan-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanMetadata {
    pub title: String,
    #[serde(default)]
    pub version: String,
    /// Free-form date as written by the author.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub description: String,
    /// Overall completion, 0 to 100.
    #[serde(default)]
    pub progression: f64,
    /// Path of the Markdown file this plan was read from.
    #[serde(default)]
    pub file_path: String,
}

/// One checklist item.
///
/// `status` is free-form; `completed` is the authoritative "done" flag. The
/// two are tracked independently and may disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub phase: String,
    /// 1 for top-level items, increasing with nesting.
    pub level: u32,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Phase name with the empty phase mapped to [`GENERAL_PHASE`].
    pub fn phase_or_general(&self) -> &str {
        if self.phase.trim().is_empty() {
            GENERAL_PHASE
        } else {
            &self.phase
        }
    }
}

/// A development plan in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub metadata: PlanMetadata,
    pub tasks: Vec<Task>,
    /// Either empty or exactly [`EMBEDDING_DIM`] values.
    #[serde(default)]
    pub embeddings: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Mutable lookup of a task by id.
    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Distinct phase names, sorted. Tasks without a phase count as
    /// [`GENERAL_PHASE`].
    pub fn phases(&self) -> BTreeSet<String> {
        self.tasks
            .iter()
            .map(|t| t.phase_or_general().to_owned())
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }

    /// Completion percentage derived from the `completed` flags.
    pub fn computed_progression(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.tasks.len() as f64 * 100.0
    }

    /// Lossless structural serialization (JSON bytes).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .with_context(|| format!("failed to serialize plan {}", self.id))
    }

    /// Inverse of [`Plan::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to deserialize plan")
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders shared by unit tests across the crate.

    use super::*;

    pub fn task(id: &str, title: &str, status: &str, phase: &str) -> Task {
        let ts = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Task {
            id: id.to_owned(),
            title: title.to_owned(),
            description: String::new(),
            status: status.to_owned(),
            phase: phase.to_owned(),
            level: 1,
            priority: String::new(),
            completed: status == STATUS_COMPLETED,
            dependencies: Vec::new(),
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn plan(id: &str, tasks: Vec<Task>) -> Plan {
        let ts = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Plan {
            id: id.to_owned(),
            metadata: PlanMetadata {
                title: "Roadmap".to_owned(),
                version: "1.0".to_owned(),
                date: "2025-03-01".to_owned(),
                description: String::new(),
                progression: 50.0,
                file_path: "plans/roadmap.md".to_owned(),
            },
            tasks,
            embeddings: Vec::new(),
            created_at: ts,
            updated_at: ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{plan, task};
    use super::*;

    #[test]
    fn serialize_roundtrip_is_lossless() {
        let mut p = plan(
            "plan-1",
            vec![
                task("a", "Design schema", "completed", "Phase 1"),
                task("b", "Write \"queries\"", "in_progress", ""),
            ],
        );
        p.embeddings = (0..EMBEDDING_DIM).map(|i| i as f32 / 7.0).collect();
        p.metadata.progression = 33.333333333333336;
        p.tasks[1].dependencies = vec!["a".to_owned()];
        p.updated_at = now();

        let bytes = p.serialize().unwrap();
        let back = Plan::deserialize(&bytes).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn phases_map_empty_to_general() {
        let p = plan(
            "p",
            vec![
                task("a", "A", "pending", "Phase 1"),
                task("b", "B", "pending", ""),
                task("c", "C", "pending", "Phase 1"),
            ],
        );
        let phases: Vec<_> = p.phases().into_iter().collect();
        assert_eq!(phases, vec!["General".to_owned(), "Phase 1".to_owned()]);
    }

    #[test]
    fn computed_progression() {
        let p = plan(
            "p",
            vec![
                task("a", "A", "completed", ""),
                task("b", "B", "pending", ""),
                task("c", "C", "pending", ""),
                task("d", "D", "completed", ""),
            ],
        );
        assert_eq!(p.completed_count(), 2);
        assert!((p.computed_progression() - 50.0).abs() < f64::EPSILON);
        assert_eq!(plan("p", vec![]).computed_progression(), 0.0);
    }

    #[test]
    fn now_has_microsecond_resolution() {
        assert_eq!(now().timestamp_subsec_nanos() % 1_000, 0);
    }
}
