//! lexrelay daemon - streaming chat relay for the regulation explorer

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lexrelay::config::Config;
use lexrelay::error::Result;
use lexrelay::server::ChatServer;

/// lexrelay - Rate-limited streaming chat relay
#[derive(Parser)]
#[command(name = "lexrelay")]
#[command(about = "A rate-limited streaming chat relay for a regulation explorer")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Listen address, overriding the config file (e.g. 0.0.0.0:8787)
    #[arg(long, short = 'l', global = true)]
    pub listen: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the relay server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config, cli.listen).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lexrelay=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>, listen: Option<String>) -> Result<()> {
    tracing::info!("Starting lexrelay");

    let mut config = Config::load(config_path)?;
    if let Some(listen) = listen {
        config.server.listen_addr = listen;
    }
    tracing::debug!("Config loaded: {:?}", config);

    ChatServer::new(config).serve().await
}
