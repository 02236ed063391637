//! Single owner of node state
//!
//! Chain and pool change only through `Ledger`, which keeps the pool
//! consistent with whatever UTXO set the chain currently holds. The node
//! wraps one `Ledger` in a lock so every mutation is serialized.

use crate::core::block::Block;
use crate::core::blockchain::{Blockchain, BlockchainError};
use crate::core::consensus::ConsensusParams;
use crate::core::transaction::{Transaction, UnspentTxOut, UtxoSet};
use crate::mining::mempool::{Mempool, MempoolError};

/// Everything needed to build and try candidate blocks on the current head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub index: u64,
    pub prev_hash: String,
    pub difficulty: u32,
    pub minter_balance: u64,
    pub minter_address: String,
    pub transactions: Vec<Transaction>,
}

impl BlockTemplate {
    /// The candidate block minted at `timestamp`
    pub fn at(&self, timestamp: u64) -> Block {
        Block::new(
            self.index,
            self.prev_hash.clone(),
            timestamp,
            self.transactions.clone(),
            self.difficulty,
            self.minter_balance,
            self.minter_address.clone(),
        )
    }
}

/// Chain store and mempool behind one mutation path
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    chain: Blockchain,
    mempool: Mempool,
}

impl Ledger {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            chain: Blockchain::with_params(params),
            mempool: Mempool::new(),
        }
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn latest(&self) -> &Block {
        self.chain.latest()
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        self.chain.utxo_set()
    }

    /// Copies safe to hand out without holding the lock
    pub fn blocks_snapshot(&self) -> Vec<Block> {
        self.chain.blocks().to_vec()
    }

    pub fn utxo_snapshot(&self) -> Vec<UnspentTxOut> {
        self.chain.utxo_set().to_vec()
    }

    pub fn pool_snapshot(&self) -> Vec<Transaction> {
        self.mempool.snapshot()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.chain.balance(address)
    }

    /// Append a block, then drop pooled transactions it invalidated
    pub fn append_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        self.chain.append_block(block)?;
        self.mempool.reconcile(self.chain.utxo_set());
        Ok(())
    }

    /// Adopt a heavier chain, then drop pooled transactions it invalidated
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), BlockchainError> {
        self.chain.replace_chain(candidate)?;
        self.mempool.reconcile(self.chain.utxo_set());
        Ok(())
    }

    /// Pool a transaction against the current UTXO set
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        self.mempool.add(tx, self.chain.utxo_set())
    }

    /// Template for the next block: coinbase to `minter_address` followed
    /// by `transactions`
    pub fn block_template(
        &self,
        minter_address: &str,
        transactions: Vec<Transaction>,
    ) -> BlockTemplate {
        let latest = self.chain.latest();
        let index = latest.index + 1;

        let mut all = vec![Transaction::coinbase(minter_address, index)];
        all.extend(transactions);

        BlockTemplate {
            index,
            prev_hash: latest.hash.clone(),
            difficulty: self.chain.next_difficulty(),
            minter_balance: self.chain.balance(minter_address),
            minter_address: minter_address.to_string(),
            transactions: all,
        }
    }
}
