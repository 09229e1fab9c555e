//! sitehost server binary.
//!
//! ```text
//!   client ──▶ listener ──▶ http server ──▶ content pipeline ──▶ response
//!                                 │                │
//!                                 ▼                ▼
//!                          host / port      application registry
//!                            routing      (manifests, caches, limits)
//!
//!   control socket ──▶ registry      watcher / SIGHUP ──▶ registry reload
//! ```

use std::path::PathBuf;

use clap::Parser;

use sitehost::config::{load_config, validation::validate_config, ConfigError, ServerConfig};
use sitehost::lifecycle::startup;
use sitehost::observability::logging;

#[derive(Parser)]
#[command(name = "sitehost")]
#[command(about = "Multi-tenant web application host", long_about = None)]
struct Args {
    /// Server configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application directory; repeat to scan several. Replaces `apps.directories`.
    #[arg(short, long)]
    apps: Vec<PathBuf>,

    /// Run mode visible to manifest overrides.
    #[arg(short, long)]
    mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if !args.apps.is_empty() {
        config.apps.directories = args.apps;
    }
    if let Some(mode) = args.mode {
        config.apps.mode = mode;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sitehost starting");

    startup::run(config).await?;
    Ok(())
}
