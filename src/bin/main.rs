use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cqlmigrate::config::Config;
use cqlmigrate::orchestrator::{self, Outcome};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cqlmigrate", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and apply all pending scripts under the migration root.
    Run {
        /// Path to an optional TOML config file, layered under defaults
        /// and under CQLMIGRATE_-prefixed environment variables.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Migration root directory (overrides config/env).
        #[arg(short, long, env = "CQLMIGRATE_ROOT")]
        root: Option<PathBuf>,
        /// Space-separated contact points (overrides config/env).
        #[arg(long, env = "CQLMIGRATE_CONTACT_POINTS")]
        contact_points: Option<String>,
    },
    /// Print the idempotent DDL a fresh migration root's init script
    /// should run to create the tool's own metadata keyspace and tables.
    InitTemplate {
        #[arg(long, default_value = "cqlmigrate")]
        metadata_keyspace: String,
        #[arg(long, default_value_t = 1)]
        replication_factor: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();

    match command {
        Commands::Run { config, root, contact_points } => {
            let mut cfg = Config::load(config.as_deref())?;
            if let Some(root) = root {
                cfg.root = root;
            }
            if let Some(points) = contact_points {
                cfg.contact_points = points;
            }

            init_tracing(cfg.debug);

            match orchestrator::run(cfg).await {
                Outcome::Exit(code) => std::process::exit(code),
                Outcome::ReleaseFailedNoExit => {
                    // Deliberate: the process does not call exit here so
                    // operators see the lingering lock state.
                }
            }
        }
        Commands::InitTemplate { metadata_keyspace, replication_factor } => {
            for statement in cqlmigrate::store::metadata_schema_ddl(&metadata_keyspace, replication_factor) {
                println!("{statement};");
            }
        }
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
