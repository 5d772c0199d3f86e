//! Gateway binary

use clap::{Parser, Subcommand};
use roster::{Config, ConsulDirectory, GatewayServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "roster-gateway")]
#[command(about = "roster HTTP gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway, register it and watch for backends
    Serve {
        /// Config file (defaults to $ROSTER_CONFIG or roster.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Host published in the directory
        #[arg(long)]
        advertise: Option<String>,

        /// Directory address (host:port or URL)
        #[arg(long)]
        directory: Option<String>,

        /// RPC deadline in milliseconds
        #[arg(long)]
        rpc_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            advertise,
            directory,
            rpc_timeout_ms,
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
            tracing::info!("roster-gateway {} ({})", roster::BUILD_INFO, config.node_id);

            if let Some(addr) = bind {
                config.gateway.bind_addr = addr;
            }
            if let Some(host) = advertise {
                config.gateway.advertise_host = host;
            }
            if let Some(address) = directory {
                config.directory.address = address;
            }
            if let Some(ms) = rpc_timeout_ms {
                config.gateway.rpc_timeout_ms = ms;
            }

            let directory = Arc::new(ConsulDirectory::from_config(&config.directory));
            GatewayServer::new(config.gateway, config.rules, directory)
                .serve()
                .await?;
        }
    }

    Ok(())
}
