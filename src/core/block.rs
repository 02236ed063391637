//! Block implementation for the blockchain
//!
//! A block carries its position, the link to its predecessor, the minting
//! metadata used for stake eligibility, and the list of transactions.

use crate::core::transaction::{Transaction, TxIn, TxOut, COINBASE_AMOUNT};
use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Genesis Constants
// =============================================================================

/// Address credited by the genesis transaction
pub const GENESIS_ADDRESS: &str = "SNJwxA3bCGK7ivDEA3prjD59MUUv3p58kQov8XanmBeXZH2vFaVC2ZcAs8bzstQ7mB3hFb8w8QjoUaZ5Hj3a3EPa";

/// Genesis timestamp (seconds since epoch)
pub const GENESIS_TIMESTAMP: u64 = 1_615_056_269;

/// Hex length of a SHA-256 digest
const HASH_HEX_LEN: usize = 64;

// =============================================================================
// Block Errors
// =============================================================================

/// Shape errors found before any ledger checks run
#[derive(Error, Debug, PartialEq)]
pub enum BlockError {
    #[error("Block has no transactions")]
    EmptyData,
    #[error("Malformed block hash: {0}")]
    MalformedHash(String),
    #[error("Malformed previous hash: {0}")]
    MalformedPrevHash(String),
    #[error("Block {0} has no minter address")]
    MissingMinter(u64),
}

/// A block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block index/height
    pub index: u64,
    /// Digest over all other fields
    pub hash: String,
    /// Hash of the previous block (empty for genesis)
    pub prev_hash: String,
    /// Minter-supplied timestamp, seconds since epoch
    pub timestamp: u64,
    /// Transactions; the first is always the coinbase
    #[serde(rename = "data")]
    pub transactions: Vec<Transaction>,
    pub difficulty: u32,
    /// Minter's balance when the block was minted
    pub minter_balance: u64,
    pub minter_address: String,
}

impl Block {
    /// Create a block and fill in its hash
    pub fn new(
        index: u64,
        prev_hash: String,
        timestamp: u64,
        transactions: Vec<Transaction>,
        difficulty: u32,
        minter_balance: u64,
        minter_address: String,
    ) -> Self {
        let mut block = Self {
            index,
            hash: String::new(),
            prev_hash,
            timestamp,
            transactions,
            difficulty,
            minter_balance,
            minter_address,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The fixed first block every node starts from
    pub fn genesis() -> Self {
        let genesis_tx = Transaction::new(
            vec![TxIn {
                tx_out_id: String::new(),
                tx_out_index: 0,
                signature: String::new(),
            }],
            vec![TxOut {
                address: GENESIS_ADDRESS.to_string(),
                amount: COINBASE_AMOUNT,
            }],
        );

        Self::new(
            0,
            String::new(),
            GENESIS_TIMESTAMP,
            vec![genesis_tx],
            0,
            0,
            String::new(),
        )
    }

    /// Calculate the hash from the other seven fields, in fixed order
    pub fn calculate_hash(&self) -> String {
        let data = format!(
            "{}{}{}{}{}{}{}",
            self.index,
            self.prev_hash,
            self.timestamp,
            Self::transactions_data(&self.transactions),
            self.difficulty,
            self.minter_balance,
            self.minter_address
        );
        sha256_hex(data.as_bytes())
    }

    /// Transaction ids cover inputs and outputs; signatures are added so
    /// the block hash commits to every byte of its transactions.
    fn transactions_data(transactions: &[Transaction]) -> String {
        let mut data = String::new();
        for tx in transactions {
            data.push_str(&tx.id);
            for tx_in in &tx.tx_ins {
                data.push_str(&tx_in.signature);
            }
        }
        data
    }

    /// Verify the block hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Cheap shape check for untrusted input, run before anything heavier
    pub fn validate_structure(&self) -> Result<(), BlockError> {
        if self.transactions.is_empty() {
            return Err(BlockError::EmptyData);
        }
        if !is_hex_digest(&self.hash) {
            return Err(BlockError::MalformedHash(self.hash.clone()));
        }
        if self.index == 0 {
            if !self.prev_hash.is_empty() {
                return Err(BlockError::MalformedPrevHash(self.prev_hash.clone()));
            }
        } else {
            if !is_hex_digest(&self.prev_hash) {
                return Err(BlockError::MalformedPrevHash(self.prev_hash.clone()));
            }
            if self.minter_address.is_empty() {
                return Err(BlockError::MissingMinter(self.index));
            }
        }
        Ok(())
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

fn is_hex_digest(value: &str) -> bool {
    value.len() == HASH_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}
