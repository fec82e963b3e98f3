use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/plansync-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables owned by the plan store, in dependency order.
pub const TABLES: &[&str] = &["plans", "tasks", "sync_logs"];

/// Open a pool sized by `config`.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to plan store at {}", config.redacted_url()))?;
    debug!(
        url = %config.redacted_url(),
        max_connections = config.max_connections,
        "plan store pool ready"
    );
    Ok(pool)
}

/// Bring the schema up to date. Returns how many migrations were applied
/// by this call (0 when the schema was already current).
pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    let before = applied_migrations(pool).await?;
    MIGRATOR
        .run(pool)
        .await
        .context("failed to migrate the plan store schema")?;
    let after = applied_migrations(pool).await?;

    let applied = after.saturating_sub(before);
    info!(applied, total = MIGRATOR.iter().count(), "plan store schema is current");
    Ok(applied)
}

async fn applied_migrations(pool: &PgPool) -> Result<usize> {
    let tracked: bool =
        sqlx::query_scalar("SELECT to_regclass('public._sqlx_migrations') IS NOT NULL")
            .fetch_one(pool)
            .await
            .context("failed to look up the migrations table")?;
    if !tracked {
        return Ok(0);
    }
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success")
        .fetch_one(pool)
        .await
        .context("failed to count applied migrations")?;
    Ok(usize::try_from(n).unwrap_or(0))
}

/// Create the plan store database through the `postgres` maintenance
/// database unless it already exists. Returns `true` when it was created.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let name = config
        .database_name()
        .with_context(|| format!("{} does not name a database", config.redacted_url()))?;

    let maint = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(config.maintenance_options()?)
        .await
        .with_context(|| {
            format!(
                "failed to reach the maintenance database next to {}",
                config.redacted_url()
            )
        })?;

    let result = create_if_missing(&maint, &name).await;
    maint.close().await;
    result
}

async fn create_if_missing(maint: &PgPool, name: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(maint)
            .await
            .context("failed to query pg_database")?;
    if exists {
        debug!(db = name, "plan store database already exists");
        return Ok(false);
    }

    maint
        .execute(format!("CREATE DATABASE {}", quote_ident(name)).as_str())
        .await
        .with_context(|| format!("failed to create database {name:?}"))?;
    info!(db = name, "created plan store database");
    Ok(true)
}

/// Double-quoted SQL identifier. `CREATE DATABASE` takes no bind
/// parameters.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Liveness check used by the store's health report.
pub async fn ping(pool: &PgPool) -> Result<()> {
    let one: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(pool)
        .await
        .context("plan store did not answer")?;
    anyhow::ensure!(one == 1, "plan store answered {one} to SELECT 1");
    Ok(())
}

/// Row count of every table in [`TABLES`], for `plansync db-init`.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        // Names come from the static TABLES list.
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push(((*table).to_owned(), count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::quote_ident;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("plansync"), "\"plansync\"");
        assert_eq!(quote_ident("plansync-dev"), "\"plansync-dev\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
