//! Shared test utilities for plansync integration tests.
//!
//! Every test gets its own freshly-migrated database inside one PostgreSQL
//! server shared by the whole test binary.
//!
//! - **`PLANSYNC_TEST_PG_URL`** set: that server is used as-is (CI starts
//!   one container up front).
//! - Otherwise a `postgres` container is started through testcontainers on
//!   first use and kept alive for the lifetime of the process.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use plansync_db::pool;

/// Environment variable naming an externally managed server.
pub const TEST_PG_URL_ENV: &str = "PLANSYNC_TEST_PG_URL";

struct SharedServer {
    /// Server root URL, without a database name.
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_SERVER: OnceCell<SharedServer> = OnceCell::const_new();

async fn start_server() -> SharedServer {
    if let Ok(url) = std::env::var(TEST_PG_URL_ENV) {
        return SharedServer {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedServer {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

async fn base_url() -> &'static str {
    &SHARED_SERVER.get_or_init(start_server).await.base_url
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", base_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely-named database. Call [`TestDb::drop_db`] at the end
/// of the test.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    /// Create a new database and apply all migrations.
    pub async fn create() -> Self {
        let name = format!("plansync_test_{}", Uuid::new_v4().simple());

        let maint = maintenance_pool().await;
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create test database {name}: {e}"));
        maint.close().await;

        let url = format!("{}/{name}", base_url().await);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to test database {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should succeed");

        Self { pool, name }
    }

    /// Connection URL of this database.
    pub async fn url(&self) -> String {
        format!("{}/{}", base_url().await, self.name)
    }

    /// Close the pool and drop the database. Errors are ignored.
    pub async fn drop_db(self) {
        self.pool.close().await;

        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let _ = maint
            .execute(format!("DROP DATABASE IF EXISTS {}", self.name).as_str())
            .await;
        maint.close().await;
    }
}
