//! Conflict detection and resolution between the Markdown and stored
//! snapshots of a plan.

mod detector;
mod hash;
mod resolver;

pub use detector::{
    ConflictDetector, DetectionResult, DetectorStats, detect_content_conflict,
    detect_metadata_conflicts, detect_structure_conflict, detect_task_conflicts,
    detect_timestamp_conflict, similarity_severity,
};
pub use hash::{plan_hash, task_similarity};
pub use resolver::{
    CONTENT_MERGE_THRESHOLD, ConflictResolver, ResolutionRequest, ResolutionResult, ResolverStats,
    status_rank, strategy_applies, version_wins,
};
