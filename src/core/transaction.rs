//! Transaction handling for the blockchain
//!
//! Implements the UTXO transaction model: transaction ids, input signing,
//! validation against an unspent-output set, the block reward (coinbase)
//! transaction and the atomic application of a block's transactions.

use crate::crypto::{sha256_hex, verify_address_signature, KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Reward paid by every coinbase transaction
pub const COINBASE_AMOUNT: u64 = 50;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid transaction id: expected {expected}, got {actual}")]
    InvalidId { expected: String, actual: String },
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Referenced output {0}:{1} is not unspent")]
    MissingInput(String, u64),
    #[error("Output {0}:{1} is spent more than once")]
    DuplicateInput(String, u64),
    #[error("Invalid signature on input {0}")]
    InvalidSignature(usize),
    #[error("Signing key does not own output {0}:{1}")]
    KeyMismatch(String, u64),
    #[error("Inputs ({inputs}) do not equal outputs ({outputs})")]
    Unbalanced { inputs: u64, outputs: u64 },
    #[error("Invalid coinbase transaction: {0}")]
    InvalidCoinbase(String),
    #[error("Amount overflow")]
    AmountOverflow,
    #[error("Block has no transactions")]
    EmptyBlock,
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

// =============================================================================
// Inputs, Outputs and the UTXO set
// =============================================================================

/// Transaction input (reference to previous output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxIn {
    /// Id of the transaction that created the output
    pub tx_out_id: String,
    /// Position of the output in that transaction
    pub tx_out_index: u64,
    /// Hex-encoded signature over the spending transaction's id
    pub signature: String,
}

impl TxIn {
    /// The output this input consumes
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(&self.tx_out_id, self.tx_out_index)
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOut {
    /// Recipient's address
    pub address: String,
    /// Amount of coins
    pub amount: u64,
}

/// Key of an output in the UTXO set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_out_id: String,
    pub tx_out_index: u64,
}

impl OutPoint {
    pub fn new(tx_out_id: &str, tx_out_index: u64) -> Self {
        Self {
            tx_out_id: tx_out_id.to_string(),
            tx_out_index,
        }
    }
}

/// Unspent Transaction Output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnspentTxOut {
    pub tx_out_id: String,
    pub tx_out_index: u64,
    pub address: String,
    pub amount: u64,
}

impl UnspentTxOut {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(&self.tx_out_id, self.tx_out_index)
    }
}

/// The set of unspent outputs, keyed by (txOutId, txOutIndex)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    outputs: HashMap<OutPoint, UnspentTxOut>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an unspent output
    pub fn get(&self, tx_out_id: &str, tx_out_index: u64) -> Option<&UnspentTxOut> {
        self.outputs.get(&OutPoint::new(tx_out_id, tx_out_index))
    }

    /// Whether the output an input references is still unspent
    pub fn contains(&self, tx_in: &TxIn) -> bool {
        self.outputs.contains_key(&tx_in.outpoint())
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Outputs owned by `address`, ordered by outpoint
    pub fn owned_by(&self, address: &str) -> Vec<UnspentTxOut> {
        let mut owned: Vec<UnspentTxOut> = self
            .outputs
            .values()
            .filter(|u| u.address == address)
            .cloned()
            .collect();
        owned.sort_by_key(|u| u.outpoint());
        owned
    }

    /// Sum of the outputs owned by `address`
    pub fn balance_of(&self, address: &str) -> u64 {
        self.outputs
            .values()
            .filter(|u| u.address == address)
            .map(|u| u.amount)
            .sum()
    }

    /// All outputs, ordered by outpoint
    pub fn to_vec(&self) -> Vec<UnspentTxOut> {
        let mut all: Vec<UnspentTxOut> = self.outputs.values().cloned().collect();
        all.sort_by_key(|u| u.outpoint());
        all
    }

    /// Remove consumed outputs and add created ones.
    ///
    /// Callers validate first; this never fails.
    pub fn apply(&self, txs: &[Transaction]) -> UtxoSet {
        let mut next = self.clone();
        for tx in txs {
            for tx_in in &tx.tx_ins {
                next.outputs.remove(&tx_in.outpoint());
            }
        }
        for tx in txs {
            for (index, tx_out) in tx.tx_outs.iter().enumerate() {
                let utxo = UnspentTxOut {
                    tx_out_id: tx.id.clone(),
                    tx_out_index: index as u64,
                    address: tx_out.address.clone(),
                    amount: tx_out.amount,
                };
                next.outputs.insert(utxo.outpoint(), utxo);
            }
        }
        next
    }
}

impl FromIterator<UnspentTxOut> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = UnspentTxOut>>(iter: I) -> Self {
        Self {
            outputs: iter.into_iter().map(|u| (u.outpoint(), u)).collect(),
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A balance-transfer transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Digest of inputs and outputs
    pub id: String,
    pub tx_ins: Vec<TxIn>,
    pub tx_outs: Vec<TxOut>,
}

impl Transaction {
    /// Create an unsigned transaction with its id filled in
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Self {
        let mut tx = Self {
            id: String::new(),
            tx_ins,
            tx_outs,
        };
        tx.id = tx.calculate_id();
        tx
    }

    /// Create the block reward transaction for `block_index`
    pub fn coinbase(minter_address: &str, block_index: u64) -> Self {
        Self::new(
            vec![TxIn {
                tx_out_id: String::new(),
                tx_out_index: block_index,
                signature: String::new(),
            }],
            vec![TxOut {
                address: minter_address.to_string(),
                amount: COINBASE_AMOUNT,
            }],
        )
    }

    /// Digest over every input reference and every output, in list order.
    /// Signatures are not covered: they sign this id.
    pub fn calculate_id(&self) -> String {
        let mut data = String::new();
        for tx_in in &self.tx_ins {
            data.push_str(&tx_in.tx_out_id);
            data.push_str(&tx_in.tx_out_index.to_string());
        }
        for tx_out in &self.tx_outs {
            data.push_str(&tx_out.address);
            data.push_str(&tx_out.amount.to_string());
        }
        sha256_hex(data.as_bytes())
    }

    /// Get total output amount
    pub fn total_output(&self) -> Result<u64, TransactionError> {
        self.tx_outs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.amount)
                .ok_or(TransactionError::AmountOverflow)
        })
    }

    fn check_id(&self) -> Result<(), TransactionError> {
        let expected = self.calculate_id();
        if expected != self.id {
            return Err(TransactionError::InvalidId {
                expected,
                actual: self.id.clone(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Signing & Validation
// =============================================================================

/// Sign input `input_index` of `tx`.
///
/// The referenced output must exist in `utxos` and be owned by `key_pair`.
pub fn sign_tx_in(
    tx: &Transaction,
    input_index: usize,
    key_pair: &KeyPair,
    utxos: &UtxoSet,
) -> Result<String, TransactionError> {
    let tx_in = tx
        .tx_ins
        .get(input_index)
        .ok_or(TransactionError::InvalidSignature(input_index))?;

    let referenced = utxos
        .get(&tx_in.tx_out_id, tx_in.tx_out_index)
        .ok_or_else(|| TransactionError::MissingInput(tx_in.tx_out_id.clone(), tx_in.tx_out_index))?;

    if referenced.address != key_pair.address() {
        return Err(TransactionError::KeyMismatch(
            tx_in.tx_out_id.clone(),
            tx_in.tx_out_index,
        ));
    }

    let message = id_bytes(tx)?;
    Ok(key_pair.sign_digest(&message)?)
}

/// Validate a regular (non-coinbase) transaction against `utxos`
pub fn validate_transaction(tx: &Transaction, utxos: &UtxoSet) -> Result<(), TransactionError> {
    tx.check_id()?;

    if tx.tx_ins.is_empty() {
        return Err(TransactionError::NoInputs);
    }

    let message = id_bytes(tx)?;
    let mut total_in = 0u64;
    let mut spent = HashSet::new();

    for (index, tx_in) in tx.tx_ins.iter().enumerate() {
        if !spent.insert(tx_in.outpoint()) {
            return Err(TransactionError::DuplicateInput(
                tx_in.tx_out_id.clone(),
                tx_in.tx_out_index,
            ));
        }

        let referenced = utxos
            .get(&tx_in.tx_out_id, tx_in.tx_out_index)
            .ok_or_else(|| {
                TransactionError::MissingInput(tx_in.tx_out_id.clone(), tx_in.tx_out_index)
            })?;

        if !verify_address_signature(&referenced.address, &message, &tx_in.signature) {
            return Err(TransactionError::InvalidSignature(index));
        }

        total_in = total_in
            .checked_add(referenced.amount)
            .ok_or(TransactionError::AmountOverflow)?;
    }

    let total_out = tx.total_output()?;
    if total_in != total_out {
        return Err(TransactionError::Unbalanced {
            inputs: total_in,
            outputs: total_out,
        });
    }

    Ok(())
}

/// Validate the reward transaction that opens the block at `block_index`
pub fn validate_coinbase(tx: &Transaction, block_index: u64) -> Result<(), TransactionError> {
    tx.check_id()?;

    if tx.tx_ins.len() != 1 {
        return Err(TransactionError::InvalidCoinbase(format!(
            "expected one input, got {}",
            tx.tx_ins.len()
        )));
    }
    if tx.tx_ins[0].tx_out_index != block_index {
        return Err(TransactionError::InvalidCoinbase(format!(
            "input index {} does not match block index {}",
            tx.tx_ins[0].tx_out_index, block_index
        )));
    }
    if tx.tx_outs.len() != 1 {
        return Err(TransactionError::InvalidCoinbase(format!(
            "expected one output, got {}",
            tx.tx_outs.len()
        )));
    }
    if tx.tx_outs[0].amount != COINBASE_AMOUNT {
        return Err(TransactionError::InvalidCoinbase(format!(
            "reward {} is not {}",
            tx.tx_outs[0].amount, COINBASE_AMOUNT
        )));
    }

    Ok(())
}

/// Validate a block's transaction list against the pre-block set.
///
/// Every regular transaction sees the same `utxos`; outputs created in the
/// block cannot be spent in the same block.
pub fn validate_block_transactions(
    txs: &[Transaction],
    utxos: &UtxoSet,
    block_index: u64,
) -> Result<(), TransactionError> {
    let coinbase = txs.first().ok_or(TransactionError::EmptyBlock)?;
    validate_coinbase(coinbase, block_index)?;

    let mut seen = HashSet::new();
    for tx_in in txs.iter().skip(1).flat_map(|tx| &tx.tx_ins) {
        if !seen.insert(tx_in.outpoint()) {
            return Err(TransactionError::DuplicateInput(
                tx_in.tx_out_id.clone(),
                tx_in.tx_out_index,
            ));
        }
    }

    for tx in txs.iter().skip(1) {
        validate_transaction(tx, utxos)?;
    }

    Ok(())
}

/// Validate a block's transactions and return the resulting UTXO set.
///
/// Fails atomically: on error `utxos` is untouched and nothing is returned.
pub fn process_transactions(
    txs: &[Transaction],
    utxos: &UtxoSet,
    block_index: u64,
) -> Result<UtxoSet, TransactionError> {
    validate_block_transactions(txs, utxos, block_index)?;
    Ok(utxos.apply(txs))
}

fn id_bytes(tx: &Transaction) -> Result<Vec<u8>, TransactionError> {
    hex::decode(&tx.id).map_err(|_| TransactionError::InvalidId {
        expected: tx.calculate_id(),
        actual: tx.id.clone(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A UTXO set holding one coinbase output owned by `key_pair`
    fn funded(key_pair: &KeyPair, block_index: u64) -> (Transaction, UtxoSet) {
        let coinbase = Transaction::coinbase(&key_pair.address(), block_index);
        let utxos = process_transactions(&[coinbase.clone()], &UtxoSet::new(), block_index)
            .unwrap();
        (coinbase, utxos)
    }

    fn spend(
        key_pair: &KeyPair,
        source: &Transaction,
        outputs: Vec<TxOut>,
        utxos: &UtxoSet,
    ) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxIn {
                tx_out_id: source.id.clone(),
                tx_out_index: 0,
                signature: String::new(),
            }],
            outputs,
        );
        tx.tx_ins[0].signature = sign_tx_in(&tx, 0, key_pair, utxos).unwrap();
        tx
    }

    #[test]
    fn test_coinbase_transaction() {
        let tx = Transaction::coinbase("recipient_address", 7);
        assert_eq!(tx.total_output().unwrap(), COINBASE_AMOUNT);
        assert_eq!(tx.tx_ins[0].tx_out_index, 7);
        assert!(validate_coinbase(&tx, 7).is_ok());
        assert!(matches!(
            validate_coinbase(&tx, 8),
            Err(TransactionError::InvalidCoinbase(_))
        ));
    }

    #[test]
    fn test_coinbase_reward_is_fixed() {
        let mut tx = Transaction::coinbase("minter", 1);
        tx.tx_outs[0].amount = COINBASE_AMOUNT + 1;
        tx.id = tx.calculate_id();
        assert!(matches!(
            validate_coinbase(&tx, 1),
            Err(TransactionError::InvalidCoinbase(_))
        ));
    }

    #[test]
    fn test_transaction_id_is_deterministic() {
        let a = Transaction::coinbase("addr1", 0);
        let b = Transaction::coinbase("addr1", 0);
        let c = Transaction::coinbase("addr2", 0);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_signed_transfer_is_valid() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);

        let tx = spend(
            &alice,
            &coinbase,
            vec![
                TxOut { address: bob.address(), amount: 20 },
                TxOut { address: alice.address(), amount: 30 },
            ],
            &utxos,
        );

        assert!(validate_transaction(&tx, &utxos).is_ok());
    }

    #[test]
    fn test_unbalanced_transaction_rejected() {
        let alice = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);

        let tx = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: alice.address(), amount: 60 }],
            &utxos,
        );

        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(TransactionError::Unbalanced { inputs: 50, outputs: 60 })
        ));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);

        let mut tx = Transaction::new(
            vec![TxIn {
                tx_out_id: coinbase.id.clone(),
                tx_out_index: 0,
                signature: String::new(),
            }],
            vec![TxOut { address: mallory.address(), amount: 50 }],
        );

        let err = sign_tx_in(&tx, 0, &mallory, &utxos).unwrap_err();
        assert!(matches!(err, TransactionError::KeyMismatch(_, 0)));
        assert_eq!(
            err.to_string(),
            format!("Signing key does not own output {}:0", coinbase.id)
        );

        tx.tx_ins[0].signature = mallory.sign_digest(&hex::decode(&tx.id).unwrap()).unwrap();
        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(TransactionError::InvalidSignature(0))
        ));
    }

    #[test]
    fn test_missing_input_rejected() {
        let alice = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);
        let tx = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: alice.address(), amount: 50 }],
            &utxos,
        );

        assert!(matches!(
            validate_transaction(&tx, &UtxoSet::new()),
            Err(TransactionError::MissingInput(_, 0))
        ));
    }

    #[test]
    fn test_tampered_id_rejected() {
        let alice = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);
        let mut tx = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: alice.address(), amount: 50 }],
            &utxos,
        );
        tx.tx_outs[0].amount = 49;

        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(TransactionError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_process_transactions_updates_set() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);

        let tx = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: bob.address(), amount: 50 }],
            &utxos,
        );
        let reward = Transaction::coinbase(&bob.address(), 2);

        let next = process_transactions(&[reward, tx], &utxos, 2).unwrap();
        assert_eq!(next.balance_of(&alice.address()), 0);
        assert_eq!(next.balance_of(&bob.address()), 100);
        assert!(next.get(&coinbase.id, 0).is_none());
        // the input set is untouched
        assert_eq!(utxos.balance_of(&alice.address()), 50);
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);

        let first = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: bob.address(), amount: 50 }],
            &utxos,
        );
        let second = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: alice.address(), amount: 50 }],
            &utxos,
        );
        let reward = Transaction::coinbase(&bob.address(), 2);

        let result = process_transactions(&[reward, first, second], &utxos, 2);
        assert!(matches!(result, Err(TransactionError::DuplicateInput(_, 0))));
    }

    #[test]
    fn test_same_output_twice_in_one_transaction_rejected() {
        let alice = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);

        let input = TxIn {
            tx_out_id: coinbase.id.clone(),
            tx_out_index: 0,
            signature: String::new(),
        };
        let mut tx = Transaction::new(
            vec![input.clone(), input],
            vec![TxOut { address: alice.address(), amount: 100 }],
        );
        let signature = sign_tx_in(&tx, 0, &alice, &utxos).unwrap();
        tx.tx_ins[0].signature = signature.clone();
        tx.tx_ins[1].signature = signature;

        assert!(matches!(
            validate_transaction(&tx, &utxos),
            Err(TransactionError::DuplicateInput(_, 0))
        ));
    }

    #[test]
    fn test_failure_is_atomic() {
        let alice = KeyPair::generate();
        let (coinbase, utxos) = funded(&alice, 1);
        let good = spend(
            &alice,
            &coinbase,
            vec![TxOut { address: alice.address(), amount: 50 }],
            &utxos,
        );
        let mut bad = good.clone();
        bad.tx_ins[0].tx_out_index = 5;
        bad.id = bad.calculate_id();

        let reward = Transaction::coinbase(&alice.address(), 2);
        assert!(process_transactions(&[reward, good, bad], &utxos, 2).is_err());
        assert_eq!(utxos.len(), 1);
    }

    #[test]
    fn test_empty_block_rejected() {
        assert!(matches!(
            process_transactions(&[], &UtxoSet::new(), 1),
            Err(TransactionError::EmptyBlock)
        ));
    }
}
