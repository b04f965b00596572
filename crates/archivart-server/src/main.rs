use anyhow::Context;
use archivart_server::{serve, ServerConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ArchivArt admin service HTTP API
#[derive(Debug, Parser)]
#[command(name = "archivart-server", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "ARCHIVART_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// SQLite database path, overriding the configuration
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config = config.with_bind(bind);
    }
    if let Some(database) = cli.database {
        config = config.with_database_path(database);
    }

    init_tracing(cli.json_logs || config.log_json);
    serve(config).await
}
