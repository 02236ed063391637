//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model, coinbase reward, signing)
//! - Blocks (hashing, genesis, shape checks)
//! - Consensus (difficulty, stake eligibility, fork choice)
//! - Blockchain (chain store and its UTXO set)
//! - Ledger (the single mutation path for chain and pool)

pub mod block;
pub mod blockchain;
pub mod consensus;
pub mod ledger;
pub mod transaction;

pub use block::{Block, BlockError, GENESIS_ADDRESS, GENESIS_TIMESTAMP};
pub use blockchain::{replay_full, validate_linkage, Blockchain, BlockchainError};
pub use consensus::{
    accumulated_difficulty, is_eligible, next_difficulty, ConsensusError, ConsensusParams,
    BLOCK_GENERATION_INTERVAL, DIFFICULTY_ADJUSTMENT_INTERVAL, MINTING_WITHOUT_COIN_INDEX,
};
pub use ledger::{BlockTemplate, Ledger};
pub use transaction::{
    process_transactions, sign_tx_in, validate_transaction, OutPoint, Transaction,
    TransactionError, TxIn, TxOut, UnspentTxOut, UtxoSet, COINBASE_AMOUNT,
};
