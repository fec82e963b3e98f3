mod cleanup_cmd;
mod config;
mod plan_cmds;
mod status_cmd;
mod sync_cmds;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use plansync_core::SyncService;
use plansync_core::convert::Embedder;
use plansync_core::index::{QdrantIndex, VectorIndex};
use plansync_core::model::ResolutionStrategy;
use plansync_core::store::PgPlanStore;
use plansync_db::pool;

use config::PlansyncConfig;

#[derive(Parser)]
#[command(
    name = "plansync",
    about = "Keep Markdown development plans and their stored copies in sync"
)]
struct Cli {
    /// Database URL (overrides PLANSYNC_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Config file (overrides PLANSYNC_CONFIG and the XDG default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a plansync config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/plansync")]
        db_url: String,
        /// Directory synchronized Markdown files are written to
        #[arg(long, default_value = "plans")]
        output_dir: PathBuf,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the plansync database
    DbInit,
    /// Convert Markdown plans and store them
    Convert {
        /// Markdown files to convert
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show a stored plan (or list all plans)
    Show {
        /// Plan ID to show (omit to list all)
        plan_id: Option<String>,
    },
    /// Write stored plans back to Markdown
    Sync {
        /// Plan ID to synchronize
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        plan_id: Option<String>,
        /// Synchronize every stored plan
        #[arg(long)]
        all: bool,
    },
    /// Compare a Markdown file with its stored plan
    Detect {
        /// Markdown plan file
        file: PathBuf,
        /// Print the detection result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve conflicts between a Markdown file and its stored plan
    Resolve {
        /// Markdown plan file
        file: PathBuf,
        /// Strategy applied to every conflict: manual, auto-merge,
        /// use-source, use-target, backup-both
        #[arg(long, conflicts_with = "auto")]
        strategy: Option<ResolutionStrategy>,
        /// Only resolve conflicts the configuration marks as auto-resolvable
        #[arg(long)]
        auto: bool,
        /// Name recorded on each applied resolution
        #[arg(long)]
        user: Option<String>,
        /// Print the resolution result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find stored plans similar to a text query
    Search {
        /// Free-text query
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Check connectivity to the store and the vector index
    Health,
    /// Show synchronization statistics
    Stats {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete conflict backups older than the given age
    CleanupBackups {
        /// Age threshold in days
        #[arg(long, default_value_t = 30)]
        older_than_days: u64,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Execute the `plansync init` command: write config file.
fn cmd_init(
    cli_config: Option<&std::path::Path>,
    db_url: &str,
    output_dir: PathBuf,
    force: bool,
) -> Result<()> {
    let path = config::effective_config_path(cli_config);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let mut cfg = config::ConfigFile::default();
    cfg.database.url = db_url.to_string();
    cfg.sync.markdown.output_dir = output_dir;
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url        = {db_url}");
    println!(
        "  markdown.output_dir = {}",
        cfg.sync.markdown.output_dir.display()
    );
    println!();
    println!("Next: run `plansync db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `plansync db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &PlansyncConfig) -> Result<()> {
    println!("Initializing plansync database...");

    // 1. Create the database if it does not exist.
    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database {}.", resolved.db_config.redacted_url());
    }

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    let applied = pool::run_migrations(&db_pool).await?;
    println!("Applied {applied} migration(s).");

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("plansync db-init complete.");
    Ok(())
}

#[cfg(feature = "fastembed")]
fn build_embedder() -> Result<Arc<dyn Embedder>> {
    let cache = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("plansync")
        .join("models");
    Ok(Arc::new(plansync_core::convert::embed::FastEmbedder::try_new(
        cache,
    )?))
}

#[cfg(not(feature = "fastembed"))]
fn build_embedder() -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(plansync_core::convert::HashingEmbedder::default()))
}

/// Connect to the database and assemble the service.
async fn open_service(resolved: &PlansyncConfig) -> Result<(PgPool, SyncService)> {
    let db_config = resolved
        .db_config
        .clone()
        .sized_for(resolved.sync.bulk.max_concurrency);
    let db_pool = pool::create_pool(&db_config).await?;
    let store = Arc::new(PgPlanStore::new(db_pool.clone()));

    let index: Option<Arc<dyn VectorIndex>> = if resolved.sync.vector_index.enabled {
        Some(Arc::new(QdrantIndex::new(&resolved.sync.vector_index)?))
    } else {
        None
    };

    let embedder = build_embedder()?;
    debug!(
        embedder = embedder.name(),
        vector_index = index.as_ref().map(|i| i.name()),
        "plan store connected"
    );

    let service = SyncService::new(store, index, embedder, &resolved.sync);
    Ok((db_pool, service))
}

/// First Ctrl+C cancels bulk work; the second exits immediately.
fn install_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        let mut got_first_signal = false;
        loop {
            tokio::signal::ctrl_c().await.ok();
            if std::mem::replace(&mut got_first_signal, true) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping after in-flight plans (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    cancel
}

async fn run_with_service(cli: Cli) -> Result<()> {
    let resolved = PlansyncConfig::resolve(cli.database_url.as_deref(), cli.config.as_deref())?;
    let (db_pool, service) = open_service(&resolved).await?;

    let result = match cli.command {
        Commands::Convert { files } => plan_cmds::run_convert(&service, &files).await,
        Commands::Show { plan_id } => plan_cmds::run_show(&service, plan_id.as_deref()).await,
        Commands::Sync { plan_id, all } => {
            let target = if all { None } else { plan_id };
            sync_cmds::run_sync(&service, target.as_deref(), install_ctrl_c()).await
        }
        Commands::Detect { file, json } => sync_cmds::run_detect(&service, &file, json).await,
        Commands::Resolve {
            file,
            strategy,
            auto,
            user,
            json,
        } => {
            let options = sync_cmds::ResolveOptions {
                strategy,
                auto,
                user,
                json,
            };
            sync_cmds::run_resolve(&service, &file, options).await
        }
        Commands::Search { query, limit } => sync_cmds::run_search(&service, &query, limit).await,
        Commands::Health => status_cmd::run_health(&service).await,
        Commands::Stats { json } => status_cmd::run_stats(&service, json).await,
        Commands::CleanupBackups { older_than_days } => {
            cleanup_cmd::run_cleanup_backups(&service, older_than_days)
        }
        Commands::Init { .. } | Commands::DbInit | Commands::Completions { .. } => {
            Err(anyhow::anyhow!("command does not use the plan store"))
        }
    };

    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            ref db_url,
            ref output_dir,
            force,
        } => cmd_init(cli.config.as_deref(), db_url, output_dir.clone(), force),
        Commands::DbInit => {
            let resolved =
                PlansyncConfig::resolve(cli.database_url.as_deref(), cli.config.as_deref())?;
            cmd_db_init(&resolved).await
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "plansync", &mut std::io::stdout());
            Ok(())
        }
        _ => run_with_service(cli).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_requires_id_or_all() {
        assert!(Cli::try_parse_from(["plansync", "sync"]).is_err());
        assert!(Cli::try_parse_from(["plansync", "sync", "plan-1", "--all"]).is_err());

        let cli = Cli::try_parse_from(["plansync", "sync", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Sync { plan_id: None, all: true }));
    }

    #[test]
    fn resolve_parses_strategy_names() {
        let cli = Cli::try_parse_from([
            "plansync",
            "resolve",
            "plan.md",
            "--strategy",
            "use-source",
            "--user",
            "ana",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve { strategy, user, .. } => {
                assert_eq!(strategy, Some(ResolutionStrategy::UseSource));
                assert_eq!(user.as_deref(), Some("ana"));
            }
            _ => panic!("expected resolve"),
        }

        assert!(
            Cli::try_parse_from(["plansync", "resolve", "plan.md", "--strategy", "coin-flip"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["plansync", "resolve", "plan.md", "--auto", "--strategy", "manual"])
                .is_err()
        );
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "plansync",
            "stats",
            "--json",
            "--database-url",
            "postgresql://x/y",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("postgresql://x/y"));
    }
}
