//! tda-audit - Destination audit service
//!
//! Runs the seven-bloc audit pipeline of a tourism destination in three
//! externally-triggered segments separated by human validation gates.
//! HTTP REST + SSE on the configured bind address (default 127.0.0.1:5740).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tda_common::config::{default_config_path, resolve_root_folder};
use tda_common::events::EventBus;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tda_audit::config::{AuditConfig, DATABASE_FILE, MODULE_NAME, ROOT_FOLDER_ENV};
use tda_audit::services::{build_providers, AuditPipeline};
use tda_audit::AppState;

#[derive(Debug, Parser)]
#[command(name = "tda-audit", version, about = "Destination audit service")]
struct Args {
    /// Root folder holding the database (else TDA_ROOT_FOLDER, config, OS default)
    #[arg(long)]
    root_folder: Option<String>,

    /// Config file (default: ~/.config/tda/tda-audit.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(MODULE_NAME));
    let mut config = match &config_path {
        Some(path) => AuditConfig::load(path)?,
        None => AuditConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.logging.ansi)
        .init();

    info!("Starting {} (Destination Audit) service", MODULE_NAME);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config_path.as_deref(),
    );
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = root_folder.join(DATABASE_FILE);
    info!("Database: {}", db_path.display());
    let db_pool = tda_audit::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(config.server.event_capacity);

    let providers = build_providers(&config.providers);
    let pipeline = AuditPipeline::new(db_pool.clone(), event_bus.clone(), providers, &config);
    let state = AppState::new(db_pool, event_bus, pipeline);
    let app = tda_audit::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
