use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::model::Plan;

const FIELD: u8 = 0x1f;
const RECORD: u8 = 0x1e;

/// Content fingerprint over title, version, progression, task count and
/// every task's `(id, title, status)`.
///
/// Tasks are hashed in id order, so two snapshots holding the same tasks in
/// a different order hash identically. Progression is hashed at the one
/// decimal a Markdown summary line keeps.
pub fn plan_hash(plan: &Plan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan.metadata.title.as_bytes());
    hasher.update([FIELD]);
    hasher.update(plan.metadata.version.as_bytes());
    hasher.update([FIELD]);
    hasher.update(progression_tenths(plan.metadata.progression).to_le_bytes());
    hasher.update([FIELD]);
    hasher.update((plan.tasks.len() as u64).to_le_bytes());

    let mut tasks: Vec<_> = plan.tasks.iter().collect();
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    for task in tasks {
        hasher.update([RECORD]);
        hasher.update(task.id.as_bytes());
        hasher.update([FIELD]);
        hasher.update(task.title.as_bytes());
        hasher.update([FIELD]);
        hasher.update(task.status.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn progression_tenths(progression: f64) -> i64 {
    (progression * 10.0).round() as i64
}

/// `|ids(a) ∩ ids(b)| / max(|a|, |b|)`: 1.0 when both plans are empty,
/// 0.0 when exactly one is.
pub fn task_similarity(a: &Plan, b: &Plan) -> f64 {
    let ids_a: HashSet<&str> = a.tasks.iter().map(|t| t.id.as_str()).collect();
    let ids_b: HashSet<&str> = b.tasks.iter().map(|t| t.id.as_str()).collect();
    match (ids_a.is_empty(), ids_b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let shared = ids_a.intersection(&ids_b).count();
            shared as f64 / ids_a.len().max(ids_b.len()) as f64
        }
    }
}
