//! P2P Node implementation
//!
//! The node ties the ledger, the peer network, the wallet and the minter
//! together and exposes the operations the HTTP layer calls.

use crate::core::{
    Block, BlockchainError, ConsensusParams, Ledger, Transaction, UnspentTxOut,
};
use crate::crypto::{KeyError, KeyPair};
use crate::mining::{MempoolError, Minter, Payload};
use crate::network::message::Message;
use crate::network::peer::{PeerError, PeerManager};
use crate::network::server::{connect_to_peer, handle_connection, upgrade, Server};
use crate::network::sync::ChainSync;
use crate::wallet::{create_transaction, Wallet, WalletError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Messages buffered between connection loops and the node
const MESSAGE_QUEUE_SIZE: usize = 1000;

/// Pause after the first failed accept; doubles per consecutive failure
const ACCEPT_RETRY_BASE: Duration = Duration::from_millis(100);
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(5);

/// Errors surfaced by node operations
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Node already started")]
    AlreadyStarted,
}

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Port the peer WebSocket server listens on
    pub peer_port: u16,
    /// Port the HTTP control plane listens on
    pub http_port: u16,
    /// Initial peers to connect to, as `ws://host:port`
    pub bootstrap_peers: Vec<String>,
    /// Key file for the node's own wallet
    pub wallet_path: PathBuf,
    /// Keep minting blocks in the background
    pub auto_mint: bool,
    pub consensus: ConsensusParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_port: 6001,
            http_port: 3001,
            bootstrap_peers: Vec::new(),
            wallet_path: PathBuf::from("node/wallet/default.json"),
            auto_mint: false,
            consensus: ConsensusParams::default(),
        }
    }
}

/// The main P2P node
pub struct Node {
    pub config: NodeConfig,
    ledger: Arc<RwLock<Ledger>>,
    peer_manager: Arc<PeerManager>,
    chain_sync: Arc<ChainSync>,
    wallet: Wallet,
    minter: Minter,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
    /// Taken by `start`
    message_rx: Mutex<Option<mpsc::Receiver<(SocketAddr, Message)>>>,
}

impl Node {
    /// Create a node, loading or creating its wallet
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let wallet = Wallet::load_or_create(&config.wallet_path)?;
        Ok(Self::with_wallet(config, wallet))
    }

    /// Create a node around an existing wallet
    pub fn with_wallet(config: NodeConfig, wallet: Wallet) -> Self {
        Self::with_minter(config, Minter::new(&wallet.address()), wallet)
    }

    /// Create a node with a custom minter
    pub fn with_minter(config: NodeConfig, minter: Minter, wallet: Wallet) -> Self {
        let ledger = Arc::new(RwLock::new(Ledger::new(config.consensus)));
        let peer_manager = Arc::new(PeerManager::new());
        let chain_sync = Arc::new(ChainSync::new(ledger.clone(), peer_manager.clone()));
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_QUEUE_SIZE);

        log::info!("Node address: {}", wallet.address());

        Self {
            config,
            ledger,
            peer_manager,
            chain_sync,
            wallet,
            minter,
            message_tx,
            message_rx: Mutex::new(Some(message_rx)),
        }
    }

    /// The shared ledger, for read access
    pub fn ledger(&self) -> Arc<RwLock<Ledger>> {
        self.ledger.clone()
    }

    /// Get the peer manager (for broadcasting blocks from external sources)
    pub fn peer_manager(&self) -> Arc<PeerManager> {
        self.peer_manager.clone()
    }

    /// The node's own address
    pub fn address(&self) -> String {
        self.wallet.address()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_blockchain(&self) -> Vec<Block> {
        self.ledger.read().await.blocks_snapshot()
    }

    pub async fn get_unspent_tx_outs(&self) -> Vec<UnspentTxOut> {
        self.ledger.read().await.utxo_snapshot()
    }

    /// Unspent outputs owned by `address`
    pub async fn unspent_for_address(&self, address: &str) -> Vec<UnspentTxOut> {
        self.ledger.read().await.utxo_set().owned_by(address)
    }

    pub async fn get_my_unspent_tx_outs(&self) -> Vec<UnspentTxOut> {
        self.unspent_for_address(&self.address()).await
    }

    pub async fn get_transaction_pool(&self) -> Vec<Transaction> {
        self.ledger.read().await.pool_snapshot()
    }

    /// Balance of `address`, or of the node's own wallet
    pub async fn get_account_balance(&self, address: Option<&str>) -> u64 {
        let own = self.address();
        let address = address.unwrap_or(&own);
        self.ledger.read().await.balance(address)
    }

    /// Find a transaction in the chain
    pub async fn find_transaction(&self, id: &str) -> Option<Transaction> {
        self.ledger.read().await.chain().find_transaction(id).cloned()
    }

    /// Remote addresses of connected peers
    pub async fn get_sockets(&self) -> Vec<String> {
        self.peer_manager
            .get_peers()
            .await
            .into_iter()
            .map(|addr| addr.to_string())
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Mint a block holding the current pool and announce it
    pub async fn generate_next_block(&self) -> Result<Block, NodeError> {
        let block = self.minter.mint(&self.ledger, Payload::Pool).await?;
        self.broadcast_latest().await;
        Ok(block)
    }

    /// Mint a block holding exactly `transactions` and announce it
    pub async fn generate_raw_next_block(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Block, NodeError> {
        let block = self
            .minter
            .mint(&self.ledger, Payload::Raw(transactions))
            .await?;
        self.broadcast_latest().await;
        Ok(block)
    }

    /// Pool a transfer of `amount` to `address`, signed with `private_key`
    /// or the node's own key, and announce the pool
    pub async fn send_transaction(
        &self,
        address: &str,
        amount: u64,
        private_key: Option<&str>,
    ) -> Result<Transaction, NodeError> {
        let key_pair = match private_key {
            Some(hex_key) => KeyPair::from_private_key_hex(hex_key)?,
            None => self.wallet.key_pair().clone(),
        };

        let tx = {
            let mut ledger = self.ledger.write().await;
            let tx = create_transaction(
                address,
                amount,
                &key_pair,
                ledger.utxo_set(),
                ledger.mempool().transactions(),
            )?;
            ledger.add_transaction(tx.clone())?;
            tx
        };

        log::info!("Pooled transaction {}: {} to {}", tx.id, amount, address);
        self.broadcast_pool().await;
        Ok(tx)
    }

    // =========================================================================
    // Networking
    // =========================================================================

    /// Dial a peer at a `ws://host:port` URL
    pub async fn connect_to_peers(&self, url: &str) -> Result<(), NodeError> {
        log::info!("Connecting to peer: {}", url);

        let (ws, addr) = connect_to_peer(url).await?;
        let peer_manager = self.peer_manager.clone();
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ws, addr, peer_manager, message_tx, true).await {
                log::warn!("Connection error with {}: {}", addr, e);
            }
        });

        Ok(())
    }

    pub async fn broadcast_latest(&self) {
        let msg = self.chain_sync.latest_message().await;
        self.peer_manager.broadcast(msg).await;
    }

    pub async fn broadcast_pool(&self) {
        let msg = self.chain_sync.pool_message().await;
        self.peer_manager.broadcast(msg).await;
    }

    /// Handle one message from a peer
    pub async fn handle_message(&self, from: SocketAddr, msg: Message) {
        log::debug!("Handling {} from {}", msg.type_name(), from);

        let reply = match msg {
            Message::QueryLatest => Some(self.chain_sync.latest_message().await),
            Message::QueryAll => Some(self.chain_sync.chain_message().await),
            Message::QueryTransactionPool => Some(self.chain_sync.pool_message().await),
            Message::ResponseBlockchain(blocks) => {
                self.chain_sync.handle_blockchain_response(blocks, from).await;
                None
            }
            Message::ResponseTransactionPool(txs) => {
                self.chain_sync.handle_pool_response(txs, from).await;
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = self.peer_manager.send_to(&from, reply).await {
                log::warn!("Failed to reply to {}: {}", from, e);
            }
        }
    }

    /// Run the peer server, dial bootstrap peers, start auto-minting if
    /// configured, then process peer messages until shut down
    pub async fn start(self: Arc<Self>) -> Result<(), NodeError> {
        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        let server = Server::bind(self.config.peer_port).await?;
        log::info!("Node started on peer port {}", server.port());

        // Spawn connection acceptor
        let accept_peer_manager = self.peer_manager.clone();
        let accept_message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                match server.accept().await {
                    Ok((stream, addr)) => {
                        failures = 0;
                        log::info!("Incoming connection from {}", addr);
                        let pm = accept_peer_manager.clone();
                        let tx = accept_message_tx.clone();
                        tokio::spawn(async move {
                            let result = match upgrade(stream).await {
                                Ok(ws) => handle_connection(ws, addr, pm, tx, false).await,
                                Err(e) => Err(e),
                            };
                            if let Err(e) = result {
                                log::warn!("Connection error with {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        let delay = accept_retry_delay(failures);
                        failures = failures.saturating_add(1);
                        log::error!("Accept error: {} (retrying in {:?})", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        // Connect to bootstrap peers
        for url in &self.config.bootstrap_peers {
            if let Err(e) = self.connect_to_peers(url).await {
                log::warn!("Could not reach bootstrap peer {}: {}", url, e);
            }
        }

        if self.config.auto_mint {
            let node = self.clone();
            tokio::spawn(async move { node.mint_forever().await });
        }

        // Message handling loop
        while let Some((from, msg)) = message_rx.recv().await {
            self.handle_message(from, msg).await;
        }

        Ok(())
    }

    async fn mint_forever(&self) {
        log::info!("Auto-minting to {}", self.address());
        loop {
            if let Err(e) = self.generate_next_block().await {
                log::warn!("Minting failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Backoff before the next accept after `failures` consecutive errors
fn accept_retry_delay(failures: u32) -> Duration {
    ACCEPT_RETRY_BASE
        .saturating_mul(1u32 << failures.min(16))
        .min(ACCEPT_RETRY_MAX)
}
