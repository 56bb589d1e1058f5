//! appgridd — the appgrid daemon.
//!
//! Single binary that opens the state store and runs the AppService
//! controller, plus a few one-shot commands for editing the store:
//!
//! ```text
//! appgridd run --config /etc/appgrid/appgrid.toml
//! appgridd apply --data-dir /var/lib/appgrid --file web.toml
//! appgridd get --data-dir /var/lib/appgrid default/web
//! appgridd delete --data-dir /var/lib/appgrid default/web
//! ```
//!
//! redb holds an exclusive lock on the database file, so the one-shot
//! commands run while the daemon is stopped.

mod daemon;
mod manifest;

use std::path::{Path, PathBuf};

use anyhow::Context;
use appgrid_core::OperatorConfig;
use appgrid_state::{LabelSelector, ObjectKey, StateStore};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DB_FILE: &str = "appgrid.redb";
const DEFAULT_DATA_DIR: &str = "/var/lib/appgrid";

#[derive(Parser)]
#[command(name = "appgridd", about = "appgrid daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller until interrupted.
    Run {
        /// Path to appgrid.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state. Overrides the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Number of reconcile workers. Overrides the config file.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Create or update an AppService from a JSON or TOML manifest.
    Apply {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        /// Manifest file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Delete an AppService and the pods it owns.
    Delete {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        /// `namespace/name`.
        key: ObjectKey,
    },

    /// Print an AppService and its pods as JSON.
    Get {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        /// Label key used to find the pods.
        #[arg(long, default_value = "app")]
        label_key: String,

        /// `namespace/name`.
        key: ObjectKey,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            workers,
        } => {
            let mut config = match config {
                Some(path) => OperatorConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => OperatorConfig::default(),
            };
            if let Some(dir) = data_dir {
                config.state.data_dir = dir;
            }
            if let Some(n) = workers {
                config.controller.workers = n;
            }
            config.validate()?;
            daemon::run(config).await
        }
        Command::Apply { data_dir, file } => {
            let state = open_store(&data_dir)?;
            let app = manifest::load(&file)?;
            let stored = state.put_app_service(&app)?;
            info!(key = %stored.key(), size = stored.spec.replicas, "app service applied");
            print_json(&stored)
        }
        Command::Delete { data_dir, key } => {
            let state = open_store(&data_dir)?;
            if state.delete_app_service(&key)? {
                info!(%key, "app service deleted");
            } else {
                anyhow::bail!("app service {key} not found");
            }
            Ok(())
        }
        Command::Get {
            data_dir,
            label_key,
            key,
        } => {
            let state = open_store(&data_dir)?;
            let app = state
                .get_app_service(&key)?
                .with_context(|| format!("app service {key} not found"))?;
            let pods = state.list_pods(&key.namespace, &LabelSelector::single(&label_key, &key.name))?;
            print_json(&serde_json::json!({ "appService": app, "pods": pods }))
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,appgridd=debug,appgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Open (creating if needed) the store under `data_dir`.
fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE);
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
