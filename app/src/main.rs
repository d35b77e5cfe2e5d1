use std::path::PathBuf;

use clap::Parser;
use dbview_core::config::{self, ViewerConfig};
use tracing_subscriber::EnvFilter;

/// Browse tables and run SQL against a SQLite file from the browser.
#[derive(Debug, Parser)]
#[command(name = "dbview", version)]
struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite database file to open on every request.
    #[arg(long)]
    database: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> Result<ViewerConfig, config::ConfigError> {
    let mut loaded = match &cli.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load_default()?,
    };

    if let Some(database) = &cli.database {
        loaded.database_path.clone_from(database);
    }
    if let Some(host) = &cli.host {
        loaded.bind_host.clone_from(host);
    }
    if let Some(port) = cli.port {
        loaded.port = port;
    }
    Ok(loaded)
}

fn init_tracing(config: &ViewerConfig) {
    let fallback = config.log_filter.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config);

    dbview_web::serve(&config).await?;
    Ok(())
}
