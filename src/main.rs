//! Stakecoin CLI Application
//!
//! Runs a node (peer server, HTTP control plane, optional auto-minting) or
//! manages the node's key file.

use clap::{Parser, Subcommand};
use stakecoin::api::{create_router, ApiState};
use stakecoin::network::{Node, NodeConfig};
use stakecoin::wallet::Wallet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stakecoin")]
#[command(version = "0.1.0")]
#[command(about = "A minimal proof-of-stake UTXO blockchain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node
    Node {
        /// Port for peer WebSocket connections
        #[arg(long, default_value = "6001")]
        peer_port: u16,

        /// Port for the HTTP control plane
        #[arg(long, default_value = "3001")]
        http_port: u16,

        /// Initial peers to connect to (comma-separated ws://host:port)
        #[arg(long)]
        peers: Option<String>,

        /// Key file for the node's wallet
        #[arg(short, long, default_value = "node/wallet/default.json")]
        wallet: PathBuf,

        /// Keep minting blocks in the background
        #[arg(long)]
        mint: bool,
    },

    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new key file
    New {
        #[arg(short, long, default_value = "node/wallet/default.json")]
        wallet: PathBuf,
    },

    /// Show the address of a key file
    Show {
        #[arg(short, long, default_value = "node/wallet/default.json")]
        wallet: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Node {
            peer_port,
            http_port,
            peers,
            wallet,
            mint,
        } => {
            let bootstrap_peers = peers
                .map(|p| {
                    p.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let config = NodeConfig {
                peer_port,
                http_port,
                bootstrap_peers,
                wallet_path: wallet,
                auto_mint: mint,
                ..NodeConfig::default()
            };
            run_node(config)
        }
        Commands::Wallet { action } => run_wallet_command(action),
    }
}

fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        let http_port = config.http_port;
        let node = Arc::new(Node::new(config)?);

        println!("🚀 Starting stakecoin node");
        println!("   Address: {}", node.address());
        println!("   Peer port: {}", node.config.peer_port);
        println!("   HTTP port: {}", http_port);

        let p2p_node = node.clone();
        let mut p2p = tokio::spawn(async move {
            if let Err(e) = p2p_node.start().await {
                log::error!("P2P node error: {}", e);
            }
        });

        let app = create_router(ApiState::new(node));
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
        log::info!("HTTP control plane listening on http://0.0.0.0:{}", http_port);

        tokio::select! {
            result = axum::serve(listener, app) => result?,
            _ = &mut p2p => log::warn!("P2P node stopped"),
            _ = tokio::signal::ctrl_c() => println!("\n📴 Shutting down..."),
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn run_wallet_command(action: WalletCommands) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        WalletCommands::New { wallet } => {
            if wallet.exists() {
                return Err(format!("{} already exists", wallet.display()).into());
            }
            let created = Wallet::new();
            created.save(&wallet)?;
            println!("✅ Wallet created at {}", wallet.display());
            println!("   Address: {}", created.address());
        }

        WalletCommands::Show { wallet } => {
            let loaded = Wallet::load(&wallet)?;
            let info = loaded.export_public_info();
            println!("👛 Wallet {}", wallet.display());
            println!("   Address: {}", info.address);
            println!("   Public key: {}", info.public_key);
        }
    }

    Ok(())
}
