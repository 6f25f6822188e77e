use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, Parser};
use dohgate::config::{self, RuntimeConfig};
use dohgate::server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dohgate", version, about = "Geo-routed DNS-over-HTTPS resolving proxy", long_about = None)]
struct Args {
    /// Override path to the runtime config (dohgate.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "dohgate=debug"
    } else {
        "dohgate=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    ensure_default_config(&config_path)?;

    let runtime = RuntimeConfig::load_file(&config_path)?;
    info!(config = %config_path.display(), "Loaded dohgate configuration");
    server::run(runtime).await
}

fn ensure_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    warn!("Config missing at {}. Writing defaults.", path.display());
    config::write_default_config(path)?;
    Ok(())
}
