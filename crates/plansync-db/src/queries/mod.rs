//! Raw query functions, one module per table.
//!
//! Functions that may run inside a transaction take any [`sqlx::PgExecutor`]
//! so callers can pass either `&PgPool` or `&mut *tx`.

pub mod plans;
pub mod sync_logs;
pub mod tasks;
