//! # Role Graph Admin
//!
//! Maintenance commands for a PostgreSQL-backed role graph.
//!
//! ## Configuration
//!
//! `--config` points at a TOML file. Without it the defaults are overridden
//! by environment variables:
//! - `DATABASE_URL` - PostgreSQL connection string
//! - `RBAC_DB_MAX_CONNECTIONS` - Pool size (default: 25)
//! - `RBAC_MAX_REBUILD_ITERATIONS` - Sweep bound (default: 100)
//! - `RBAC_AUDITOR_FIELDS` - Comma separated auditor-readable role fields
//! - `RUST_LOG` - Log level (default: info)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cretoai_rbac::{Accessor, PostgresRoleStore, RbacConfig, RoleGraph, RoleId, SingletonRole, UserId};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Role graph maintenance CLI
#[derive(Parser)]
#[command(name = "rbac-admin")]
#[command(about = "Maintain the role graph and its ancestor closure")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "RBAC_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Rebuild the closure of every role
    Rebuild,

    /// Compare the closure table with the parent edges
    Verify,

    /// Get or create a singleton role
    Singleton {
        /// system_administrator or system_auditor
        name: String,
    },

    /// Check whether a user holds a role
    Check {
        user: i64,
        role: i64,

        /// Treat the user as a superuser
        #[arg(long)]
        superuser: bool,

        /// Treat the user as a system auditor
        #[arg(long)]
        auditor: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => RbacConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => RbacConfig::from_env()?,
    };

    if let Command::Migrate = cli.command {
        let store = PostgresRoleStore::connect(&config.database).await?;
        store.run_migrations().await?;
        info!("Migrations applied");
        return Ok(());
    }

    let graph = RoleGraph::connect(config).await?;

    match cli.command {
        Command::Migrate => {}
        Command::Rebuild => {
            let stats = graph.rebuild_all().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "Rebuilt in {} sweeps: {} inserted, {} deleted ({:?})",
                    stats.sweeps, stats.inserted, stats.deleted, stats.elapsed
                );
            }
        }
        Command::Verify => {
            let report = graph.verify_closure().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (descendent, ancestor) in &report.missing {
                    println!("missing {} -> {}", descendent, ancestor);
                }
                for (descendent, ancestor) in &report.extra {
                    println!("extra   {} -> {}", descendent, ancestor);
                }
            }
            if !report.is_consistent() {
                bail!(
                    "Closure inconsistent: {} missing, {} extra",
                    report.missing.len(),
                    report.extra.len()
                );
            }
            println!("Closure consistent");
        }
        Command::Singleton { name } => {
            let role: SingletonRole = name.parse()?;
            let id = graph.singleton(role).await?;
            println!("{} = {}", role, id);
        }
        Command::Check {
            user,
            role,
            superuser,
            auditor,
        } => {
            let accessor = Accessor {
                user_id: UserId(user),
                is_superuser: superuser,
                is_system_auditor: auditor,
            };
            let allowed = graph.is_member(&accessor, RoleId(role)).await?;
            println!("{}", if allowed { "member" } else { "not a member" });
        }
    }

    Ok(())
}
