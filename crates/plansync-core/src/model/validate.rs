//! Structural validation of canonical plans.

use std::collections::HashSet;

use thiserror::Error;

use super::{EMBEDDING_DIM, Plan};

/// A plan or task violates an invariant of the canonical model.
///
/// Never retried automatically; the input has to be fixed.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("plan id must not be empty")]
    MissingId,

    #[error("plan id {0:?} is not usable as a file name")]
    UnsafeId(String),

    #[error("plan {0} has an empty title")]
    MissingTitle(String),

    #[error("plan {0} must contain at least one task")]
    NoTasks(String),

    #[error("task at position {position} has an empty id")]
    EmptyTaskId { position: usize },

    #[error("task {0:?} has an empty title")]
    EmptyTaskTitle(String),

    #[error("task {task:?} has level {level} (must be >= 1)")]
    InvalidLevel { task: String, level: u32 },

    #[error("duplicate task id {0:?}")]
    DuplicateTaskId(String),

    #[error("plan progression {0} is outside 0..=100")]
    ProgressionOutOfRange(f64),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },
}

/// Plan ids end up in backup directory and output file names: no path
/// separators, no leading dot, no control characters.
pub fn is_path_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// Check every Plan and Task invariant. Returns the first violation.
pub fn validate_plan(plan: &Plan) -> Result<(), ValidationError> {
    if plan.id.trim().is_empty() {
        return Err(ValidationError::MissingId);
    }
    if !is_path_safe_id(&plan.id) {
        return Err(ValidationError::UnsafeId(plan.id.clone()));
    }
    if plan.metadata.title.trim().is_empty() {
        return Err(ValidationError::MissingTitle(plan.id.clone()));
    }
    if plan.tasks.is_empty() {
        return Err(ValidationError::NoTasks(plan.id.clone()));
    }

    let progression = plan.metadata.progression;
    if !(0.0..=100.0).contains(&progression) {
        return Err(ValidationError::ProgressionOutOfRange(progression));
    }

    let mut seen = HashSet::new();
    for (position, task) in plan.tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            return Err(ValidationError::EmptyTaskId { position });
        }
        if task.title.trim().is_empty() {
            return Err(ValidationError::EmptyTaskTitle(task.id.clone()));
        }
        if task.level < 1 {
            return Err(ValidationError::InvalidLevel {
                task: task.id.clone(),
                level: task.level,
            });
        }
        if !seen.insert(task.id.as_str()) {
            return Err(ValidationError::DuplicateTaskId(task.id.clone()));
        }
    }

    if !plan.embeddings.is_empty() && plan.embeddings.len() != EMBEDDING_DIM {
        return Err(ValidationError::EmbeddingDimension {
            expected: EMBEDDING_DIM,
            actual: plan.embeddings.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{plan, task};

    fn valid() -> Plan {
        plan("plan-1", vec![task("a", "Alpha", "pending", "Phase 1")])
    }

    #[test]
    fn accepts_valid_plan() {
        assert_eq!(validate_plan(&valid()), Ok(()));
    }

    #[test]
    fn accepts_full_embedding() {
        let mut p = valid();
        p.embeddings = vec![0.1; EMBEDDING_DIM];
        assert_eq!(validate_plan(&p), Ok(()));
    }

    #[test]
    fn rejects_missing_id_and_title() {
        let mut p = valid();
        p.id = "  ".into();
        assert_eq!(validate_plan(&p), Err(ValidationError::MissingId));

        let mut p = valid();
        p.metadata.title.clear();
        assert_eq!(
            validate_plan(&p),
            Err(ValidationError::MissingTitle("plan-1".into()))
        );
    }

    #[test]
    fn rejects_ids_that_escape_a_directory() {
        for id in ["../../../x", "a/b", "..", ".hidden", "dir\\name"] {
            let mut p = valid();
            p.id = id.into();
            assert_eq!(validate_plan(&p), Err(ValidationError::UnsafeId(id.into())));
        }
        assert!(is_path_safe_id("plan-3f2a9c1d0b7e4a55"));
        assert!(is_path_safe_id("roadmap_2.1"));
    }

    #[test]
    fn rejects_empty_task_list() {
        let mut p = valid();
        p.tasks.clear();
        assert!(matches!(validate_plan(&p), Err(ValidationError::NoTasks(_))));
    }

    #[test]
    fn rejects_bad_tasks() {
        let mut p = valid();
        p.tasks[0].level = 0;
        assert!(matches!(
            validate_plan(&p),
            Err(ValidationError::InvalidLevel { level: 0, .. })
        ));

        let mut p = valid();
        p.tasks[0].title = String::new();
        assert!(matches!(
            validate_plan(&p),
            Err(ValidationError::EmptyTaskTitle(_))
        ));

        let mut p = valid();
        p.tasks.push(task("a", "Again", "pending", ""));
        assert_eq!(
            validate_plan(&p),
            Err(ValidationError::DuplicateTaskId("a".into()))
        );
    }

    #[test]
    fn rejects_wrong_embedding_dimension() {
        let mut p = valid();
        p.embeddings = vec![0.0; 128];
        assert_eq!(
            validate_plan(&p),
            Err(ValidationError::EmbeddingDimension {
                expected: EMBEDDING_DIM,
                actual: 128
            })
        );
    }

    #[test]
    fn rejects_out_of_range_progression() {
        let mut p = valid();
        p.metadata.progression = 120.0;
        assert!(matches!(
            validate_plan(&p),
            Err(ValidationError::ProgressionOutOfRange(_))
        ));
    }
}
