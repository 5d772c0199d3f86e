//! Backend binary

use clap::{Parser, Subcommand};
use roster::{BackendServer, Config, ConsulDirectory};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "roster-backend")]
#[command(about = "roster record backend (gRPC)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backend and register it in the directory
    Serve {
        /// Config file (defaults to $ROSTER_CONFIG or roster.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for gRPC
        #[arg(long)]
        grpc: Option<SocketAddr>,

        /// Host published in the directory
        #[arg(long)]
        advertise: Option<String>,

        /// Directory address (host:port or URL)
        #[arg(long)]
        directory: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            grpc,
            advertise,
            directory,
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
            tracing::info!("roster-backend {} ({})", roster::BUILD_INFO, config.node_id);

            // CLI flags take priority over the file
            if let Some(addr) = grpc {
                config.backend.grpc_addr = addr;
            }
            if let Some(host) = advertise {
                config.backend.advertise_host = host;
            }
            if let Some(address) = directory {
                config.directory.address = address;
            }

            let directory = Arc::new(ConsulDirectory::from_config(&config.directory));
            BackendServer::new(config.backend, config.rules, directory)
                .serve()
                .await?;
        }
    }

    Ok(())
}
