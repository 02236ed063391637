//! Blockchain implementation
//!
//! The chain store: the ordered block list and the UTXO set at its head.
//! Both are only ever replaced together, so no caller can observe a set
//! that belongs to a different head.

use crate::core::block::{Block, BlockError};
use crate::core::consensus::{
    self, accumulated_difficulty, current_timestamp, is_heavier, ConsensusError, ConsensusParams,
};
use crate::core::transaction::{process_transactions, Transaction, TransactionError, UtxoSet};
use primitive_types::U256;
use thiserror::Error;

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Malformed block: {0}")]
    Structural(#[from] BlockError),
    #[error("Linkage error: {0}")]
    Linkage(String),
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Chain does not start with the genesis block")]
    InvalidGenesis,
    #[error("Chain is empty")]
    EmptyChain,
    #[error("Candidate chain rejected: {0}")]
    CandidateRejected(String),
}

/// The main blockchain structure
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// Never empty; index 0 is genesis
    blocks: Vec<Block>,
    /// Unspent outputs at the head of `blocks`
    utxo_set: UtxoSet,
    params: ConsensusParams,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a new blockchain holding only the genesis block
    pub fn new() -> Self {
        Self::with_params(ConsensusParams::default())
    }

    /// Create a blockchain with custom consensus switches
    pub fn with_params(params: ConsensusParams) -> Self {
        let genesis = Block::genesis();
        let utxo_set = UtxoSet::new().apply(&genesis.transactions);
        Self {
            blocks: vec![genesis],
            utxo_set,
            params,
        }
    }

    /// All blocks, genesis first
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Get the latest block
    pub fn latest(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Get blockchain height
    pub fn height(&self) -> u64 {
        self.latest().index
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false: the genesis block is never removed
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    pub fn params(&self) -> ConsensusParams {
        self.params
    }

    /// Find a transaction anywhere in the chain
    pub fn find_transaction(&self, id: &str) -> Option<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| &b.transactions)
            .find(|tx| tx.id == id)
    }

    /// Balance of `address` at the head
    pub fn balance(&self, address: &str) -> u64 {
        self.utxo_set.balance_of(address)
    }

    /// Difficulty the next block must carry
    pub fn next_difficulty(&self) -> u32 {
        consensus::next_difficulty(&self.blocks)
    }

    pub fn accumulated_difficulty(&self) -> U256 {
        accumulated_difficulty(&self.blocks)
    }

    /// Append a block that extends the head.
    ///
    /// On any failure nothing changes.
    pub fn append_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        let utxo_set = check_block(
            &block,
            &self.blocks,
            &self.utxo_set,
            self.params,
            current_timestamp(),
        )?;

        log::info!(
            "Block {} appended: {} ({} txs, minter {})",
            block.index,
            &block.hash[..16],
            block.tx_count(),
            block.minter_address
        );

        self.blocks.push(block);
        self.utxo_set = utxo_set;
        Ok(())
    }

    /// Replace the whole chain with `candidate` if it replays cleanly and
    /// outweighs the current chain. Ties keep the current chain.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), BlockchainError> {
        let utxo_set = replay_full(&candidate, self.params, current_timestamp())
            .map_err(|e| BlockchainError::CandidateRejected(e.to_string()))?;

        let theirs = accumulated_difficulty(&candidate);
        let ours = self.accumulated_difficulty();
        if !is_heavier(&candidate, &self.blocks) {
            return Err(BlockchainError::CandidateRejected(format!(
                "accumulated difficulty {} does not exceed {}",
                theirs, ours
            )));
        }

        log::info!(
            "Replacing chain: height {} -> {} (accumulated difficulty {} -> {})",
            self.height(),
            candidate.len() - 1,
            ours,
            theirs
        );

        self.blocks = candidate;
        self.utxo_set = utxo_set;
        Ok(())
    }

    /// Check the current chain from genesis
    pub fn is_valid(&self) -> bool {
        replay_full(&self.blocks, self.params, current_timestamp())
            .map(|utxos| utxos == self.utxo_set)
            .unwrap_or(false)
    }
}

/// `candidate` must directly follow `predecessor` and carry its own hash
pub fn validate_linkage(candidate: &Block, predecessor: &Block) -> Result<(), BlockchainError> {
    if candidate.index != predecessor.index + 1 {
        return Err(BlockchainError::Linkage(format!(
            "index {} does not follow {}",
            candidate.index, predecessor.index
        )));
    }
    if candidate.prev_hash != predecessor.hash {
        return Err(BlockchainError::Linkage(format!(
            "block {} does not point at {}",
            candidate.index, predecessor.hash
        )));
    }
    if !candidate.verify_hash() {
        return Err(BlockchainError::Linkage(format!(
            "block {} hash does not match its contents",
            candidate.index
        )));
    }
    Ok(())
}

/// Rebuild the UTXO set of a whole chain, checking every block on the way.
///
/// Element 0 must be the genesis block exactly. Never touches live state.
pub fn replay_full(
    chain: &[Block],
    params: ConsensusParams,
    now: u64,
) -> Result<UtxoSet, BlockchainError> {
    let genesis = chain.first().ok_or(BlockchainError::EmptyChain)?;
    if *genesis != Block::genesis() {
        return Err(BlockchainError::InvalidGenesis);
    }

    let mut utxos = UtxoSet::new().apply(&genesis.transactions);
    for i in 1..chain.len() {
        utxos = check_block(&chain[i], &chain[..i], &utxos, params, now)?;
    }
    Ok(utxos)
}

/// Every check a block must pass on top of `predecessors`, returning the
/// UTXO set after it
fn check_block(
    block: &Block,
    predecessors: &[Block],
    utxos: &UtxoSet,
    params: ConsensusParams,
    now: u64,
) -> Result<UtxoSet, BlockchainError> {
    block.validate_structure()?;

    let prev = predecessors.last().ok_or(BlockchainError::EmptyChain)?;
    validate_linkage(block, prev)?;

    if params.verify_minting {
        consensus::validate_minting(block, predecessors, utxos, now)?;
    }

    Ok(process_transactions(&block.transactions, utxos, block.index)?)
}
