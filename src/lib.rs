//! Stakecoin: a minimal proof-of-stake UTXO blockchain node
//!
//! This crate provides:
//! - UTXO transactions signed with ECDSA (secp256k1)
//! - Stake-weighted minting with periodic difficulty adjustment
//! - Heaviest-chain fork choice by accumulated difficulty
//! - A transaction pool kept consistent with the chain
//! - WebSocket peer gossip and an HTTP control plane
//!
//! # Example
//!
//! ```rust
//! use stakecoin::core::{ConsensusParams, Ledger};
//! use stakecoin::wallet::Wallet;
//!
//! let ledger = Ledger::new(ConsensusParams::default());
//! let wallet = Wallet::new();
//!
//! assert_eq!(ledger.chain().len(), 1);
//! assert_eq!(wallet.balance(ledger.utxo_set()), 0);
//! ```

pub mod api;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod wallet;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{Block, Blockchain, ConsensusParams, Ledger, Transaction, COINBASE_AMOUNT};
pub use crypto::KeyPair;
pub use mining::{Mempool, Minter};
pub use network::{Node, NodeConfig};
pub use wallet::Wallet;
