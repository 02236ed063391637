//! Transaction pool (mempool) for pending transactions
//!
//! Holds validated transactions that are not yet in a block. The first
//! transaction to claim an output wins; later claimants are rejected, not
//! swapped in.

use crate::core::transaction::{validate_transaction, OutPoint, Transaction, TransactionError, UtxoSet};
use std::collections::HashSet;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Mempool errors
#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("Transaction validation error: {0}")]
    Invalid(#[from] TransactionError),
    #[error("Output {tx_out_id}:{tx_out_index} is already spent by a pooled transaction")]
    DoubleSpend {
        tx_out_id: String,
        tx_out_index: u64,
    },
}

// =============================================================================
// Mempool
// =============================================================================

/// Pending transactions in insertion order
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    /// Every output claimed by a pooled transaction
    claimed: HashSet<OutPoint>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `tx` if it is valid against `utxos` and claims no output a
    /// pooled transaction already claims
    pub fn add(&mut self, tx: Transaction, utxos: &UtxoSet) -> Result<(), MempoolError> {
        validate_transaction(&tx, utxos)?;

        if let Some(tx_in) = tx.tx_ins.iter().find(|i| self.claimed.contains(&i.outpoint())) {
            return Err(MempoolError::DoubleSpend {
                tx_out_id: tx_in.tx_out_id.clone(),
                tx_out_index: tx_in.tx_out_index,
            });
        }

        log::debug!("Adding transaction {} to pool", tx.id);
        self.claimed.extend(tx.tx_ins.iter().map(|i| i.outpoint()));
        self.transactions.push(tx);
        Ok(())
    }

    /// Drop every transaction that spends an output missing from `utxos`.
    ///
    /// Returns the removed transactions.
    pub fn reconcile(&mut self, utxos: &UtxoSet) -> Vec<Transaction> {
        let (keep, removed): (Vec<Transaction>, Vec<Transaction>) = self
            .transactions
            .drain(..)
            .partition(|tx| tx.tx_ins.iter().all(|i| utxos.contains(i)));

        self.transactions = keep;
        if !removed.is_empty() {
            self.claimed = self
                .transactions
                .iter()
                .flat_map(|tx| tx.tx_ins.iter().map(|i| i.outpoint()))
                .collect();
            log::info!(
                "Removed {} invalidated transaction(s) from pool",
                removed.len()
            );
        }
        removed
    }

    /// Copy of the pool contents, oldest first
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Get transaction by ID
    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Whether some pooled transaction spends this output
    pub fn is_claimed(&self, outpoint: &OutPoint) -> bool {
        self.claimed.contains(outpoint)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
