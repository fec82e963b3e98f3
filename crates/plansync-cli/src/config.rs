//! Configuration file management for plansync.
//!
//! Provides a TOML-based config file at `~/.config/plansync/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use plansync_core::SyncConfig;
use plansync_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

/// On-disk layout: a `[database]` table plus every [`SyncConfig`] section
/// (`[markdown]`, `[detection]`, `[resolution]`, `[vector_index]`, `[bulk]`).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default, flatten)]
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_owned(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Env var naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "PLANSYNC_CONFIG";

/// Return the plansync config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/plansync` or `~/.config/plansync`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("plansync");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("plansync")
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// `--config` flag > `PLANSYNC_CONFIG` > XDG default.
pub fn effective_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_path(),
    }
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn parse_config(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).context("failed to parse config file")
}

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("invalid config file {}", path.display()))
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix since the URL may carry a password.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PlansyncConfig {
    pub db_config: DbConfig,
    pub sync: SyncConfig,
}

impl PlansyncConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `PLANSYNC_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Sync settings: the config file's sections, or defaults when absent.
    ///
    /// A missing default config file is not an error; an explicitly named
    /// one that cannot be read is.
    pub fn resolve(cli_db_url: Option<&str>, cli_config: Option<&Path>) -> Result<Self> {
        let path = effective_config_path(cli_config);
        let explicit = cli_config.is_some() || std::env::var_os(CONFIG_ENV_VAR).is_some();
        let file_config = if path.exists() || explicit {
            Some(load_config(&path)?)
        } else {
            None
        };

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
            sync: file_config.map(|c| c.sync).unwrap_or_default(),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
