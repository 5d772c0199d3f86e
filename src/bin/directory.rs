//! Standalone directory binary

use clap::{Parser, Subcommand};
use roster::{Config, DirectoryServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "roster-directory")]
#[command(about = "Consul-compatible service directory with active health checks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the directory
    Serve {
        /// Config file (defaults to $ROSTER_CONFIG or roster.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for the HTTP API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Consecutive failed checks before an instance turns critical
        #[arg(long)]
        failures_before_critical: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            failures_before_critical,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from(&path.to_string_lossy())?,
                None => Config::load()?,
            };

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();
            tracing::info!("roster-directory {} ({})", roster::BUILD_INFO, config.node_id);

            if let Some(addr) = bind {
                config.directory.bind_addr = addr;
            }
            if let Some(n) = failures_before_critical {
                config.directory.failures_before_critical = n;
            }

            DirectoryServer::new(config.directory).serve().await?;
        }
    }

    Ok(())
}
