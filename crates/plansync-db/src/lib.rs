//! Postgres persistence for synchronized development plans.
//!
//! Owns the `plans`, `tasks` and `sync_logs` schema (embedded migrations),
//! the connection pool, row types, and raw query functions. Higher-level
//! semantics (canonical model mapping, transactions spanning several
//! queries) live in `plansync-core`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
