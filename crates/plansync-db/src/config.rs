//! Connection settings for the plan store.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;

/// Where the plan store lives and how many connections it may hold.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL. May carry a password; log
    /// [`DbConfig::redacted_url`] instead.
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/plansync";

    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "PLANSYNC_DATABASE_URL";

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Reported to the server as `application_name`.
    pub const APPLICATION_NAME: &str = "plansync";

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// `PLANSYNC_DATABASE_URL`, or [`Self::DEFAULT_URL`] when unset.
    pub fn from_env() -> Self {
        Self::new(env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()))
    }

    /// Grow the pool so `concurrency` plans can be written at once while
    /// one more connection records audit rows.
    pub fn sized_for(mut self, concurrency: usize) -> Self {
        let wanted = u32::try_from(concurrency).unwrap_or(u32::MAX).saturating_add(1);
        self.max_connections = self.max_connections.max(wanted);
        self
    }

    /// Parsed connection options for the plan store database.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&self.database_url)
            .with_context(|| format!("invalid database URL {}", self.redacted_url()))?;
        Ok(options.application_name(Self::APPLICATION_NAME))
    }

    /// Same server and credentials, pointed at the `postgres` maintenance
    /// database. Used to issue `CREATE DATABASE`.
    pub fn maintenance_options(&self) -> Result<PgConnectOptions> {
        Ok(self.connect_options()?.database("postgres"))
    }

    /// Name of the plan store database, if the URL names one.
    pub fn database_name(&self) -> Option<String> {
        self.connect_options()
            .ok()?
            .get_database()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
    }

    /// The URL with any password replaced by `***`.
    pub fn redacted_url(&self) -> String {
        let url = &self.database_url;
        let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
            return url.clone();
        };
        let authority_end = url[scheme_end..]
            .find('/')
            .map_or(url.len(), |i| scheme_end + i);
        let Some(at) = url[scheme_end..authority_end].rfind('@').map(|i| scheme_end + i) else {
            return url.clone();
        };
        match url[scheme_end..at].find(':').map(|i| scheme_end + i) {
            Some(colon) => format!("{}:***{}", &url[..colon], &url[at..]),
            None => url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
