//! Forward conversion: parsed Markdown data into canonical [`Plan`]s.

pub mod embed;
pub mod markdown;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::model::{self, Plan, PlanMetadata, Task, ValidationError, validate_plan};

pub use embed::{Embedder, HashingEmbedder};
pub use markdown::{ParsedPlan, parse_markdown, parse_markdown_file};

/// Deterministic plan id for a source path: `plan-` + 16 hex chars of
/// SHA-256(path).
pub fn plan_id_for_path(path: &str) -> String {
    let digest = hex::encode(Sha256::digest(path.as_bytes()));
    format!("plan-{}", &digest[..16])
}

/// Text fed to the embedder: the title followed by every task's title and
/// description.
pub fn embedding_text(metadata: &PlanMetadata, tasks: &[Task]) -> String {
    let mut text = metadata.title.clone();
    for task in tasks {
        text.push(' ');
        text.push_str(&task.title);
        if !task.description.is_empty() {
            text.push(' ');
            text.push_str(&task.description);
        }
    }
    text
}

/// Builds canonical plans and their embeddings.
#[derive(Clone)]
pub struct ForwardConverter {
    embedder: Arc<dyn Embedder>,
}

impl ForwardConverter {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Build a [`Plan`] whose id is derived from `metadata.file_path`.
    ///
    /// Returns the plan plus warnings. An embedding failure is a warning,
    /// not an error: the plan comes back with empty embeddings. Fails only
    /// when there is no file path to derive an identity from.
    pub fn convert_to_dynamic(
        &self,
        metadata: PlanMetadata,
        tasks: Vec<Task>,
    ) -> Result<(Plan, Vec<String>), ValidationError> {
        if metadata.file_path.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }
        let id = plan_id_for_path(&metadata.file_path);
        Ok(self.convert_with_id(id, metadata, tasks))
    }

    /// Same as [`Self::convert_to_dynamic`] with an explicit id, used when a
    /// synchronized file already names its plan.
    pub fn convert_with_id(
        &self,
        id: String,
        metadata: PlanMetadata,
        tasks: Vec<Task>,
    ) -> (Plan, Vec<String>) {
        let now = model::now();
        let mut warnings = Vec::new();

        let text = embedding_text(&metadata, &tasks);
        let embeddings = match self.embedder.embed(&text) {
            Ok(v) if v.len() == model::EMBEDDING_DIM => v,
            Ok(v) => {
                let msg = format!(
                    "embedder {} returned {} dimensions (expected {}); storing plan without embeddings",
                    self.embedder.name(),
                    v.len(),
                    model::EMBEDDING_DIM
                );
                warn!(plan_id = %id, "{msg}");
                warnings.push(msg);
                Vec::new()
            }
            Err(e) => {
                let msg = format!("embedding generation failed: {e:#}");
                warn!(plan_id = %id, "{msg}");
                warnings.push(msg);
                Vec::new()
            }
        };

        debug!(
            plan_id = %id,
            tasks = tasks.len(),
            embedder = self.embedder.name(),
            "converted plan"
        );

        let plan = Plan {
            id,
            metadata,
            tasks,
            embeddings,
            created_at: now,
            updated_at: now,
        };
        (plan, warnings)
    }

    /// Convert the output of the Markdown reader, honouring a footer id.
    pub fn convert_parsed(
        &self,
        parsed: ParsedPlan,
    ) -> Result<(Plan, Vec<String>), ValidationError> {
        match parsed.plan_id {
            Some(id) => Ok(self.convert_with_id(id, parsed.metadata, parsed.tasks)),
            None => self.convert_to_dynamic(parsed.metadata, parsed.tasks),
        }
    }

    /// Check the Plan/Task invariants, including the embedding dimension.
    ///
    /// Kept apart from conversion so a rejected plan can be fixed and
    /// re-validated without recomputing its embedding.
    pub fn validate_conversion(&self, plan: &Plan) -> Result<(), ValidationError> {
        validate_plan(plan)
    }

    /// Lossless serialization used for storage snapshots and backups.
    pub fn serialize_plan(&self, plan: &Plan) -> anyhow::Result<Vec<u8>> {
        plan.serialize()
    }
}
