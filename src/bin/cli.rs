//! CLI for record operations through the gateway

use clap::{Parser, Subcommand};
use roster::gateway::GatewayClient;
use roster::{Config, ConsulDirectory};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "roster")]
#[command(about = "roster record service CLI")]
#[command(version)]
struct Cli {
    /// Gateway URL; discovered through the directory when omitted
    #[arg(long)]
    gateway: Option<String>,

    /// Directory address (host:port or URL)
    #[arg(long)]
    directory: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a record
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        age: i32,

        #[arg(long)]
        category: String,
    },

    /// Fetch a record
    Get {
        /// Record id
        id: String,
    },

    /// Change a record's category
    SetCategory {
        /// Record id
        id: String,

        /// New category
        category: String,
    },

    /// Delete a record
    Delete {
        /// Record id
        id: String,
    },

    /// List every record, newest first
    List,

    /// Check that the gateway is alive
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    let client = match cli.gateway {
        Some(url) => GatewayClient::new(url, timeout)?,
        None => {
            let mut config = Config::load()?;
            if let Some(address) = cli.directory {
                config.directory.address = address;
            }
            let directory = ConsulDirectory::from_config(&config.directory);
            GatewayClient::discover(
                &directory,
                &config.gateway.service_name,
                config.gateway.tags.first().map(String::as_str).unwrap_or(""),
                timeout,
            )
            .await?
        }
    };

    match cli.command {
        Commands::Create {
            name,
            age,
            category,
        } => {
            let id = client.create(&name, age, &category).await?;
            println!("✓ Created {}", id);
        }
        Commands::Get { id } => {
            let record = client.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::SetCategory { id, category } => {
            let success = client.set_category(&id, &category).await?;
            println!("✓ Updated {}: {}", id, success);
        }
        Commands::Delete { id } => {
            let success = client.delete(&id).await?;
            println!("✓ Deleted {}: {}", id, success);
        }
        Commands::List => {
            let records = client.list().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            println!("{} record(s)", records.len());
        }
        Commands::Check => {
            if client.check_alive().await? {
                println!("✓ Gateway at {} is alive", client.base_url());
            } else {
                anyhow::bail!("gateway at {} is not answering", client.base_url());
            }
        }
    }

    Ok(())
}
