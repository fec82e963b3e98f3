//! Reconciliation between Markdown development plans and their stored,
//! queryable counterparts.
//!
//! - [`convert`] reads Markdown and builds canonical [`model::Plan`]s.
//! - [`store`] persists plans (PostgreSQL or in-memory).
//! - [`index`] pushes plan embeddings to a vector index for similarity search.
//! - [`sync`] renders stored plans back to Markdown.
//! - [`conflict`] detects and resolves divergence between the two sides.
//! - [`service`] wires all of the above into end-to-end workflows.

pub mod backup;
pub mod config;
pub mod conflict;
pub mod convert;
pub mod index;
pub mod model;
pub mod service;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use model::{Conflict, ConflictType, Plan, PlanMetadata, ResolutionStrategy, Severity, Task};
pub use service::SyncService;
