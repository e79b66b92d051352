//! herald - Console client for herald brokers.

mod commands;
mod repl;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Console client for herald pub/sub brokers")]
#[command(version)]
struct Cli {
    /// Value for the CONNECT `host` header
    #[arg(long, default_value = "herald", env = "HERALD_VHOST")]
    virtual_host: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    repl::run(cli.virtual_host).await
}
