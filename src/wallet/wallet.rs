//! Wallet implementation for the blockchain
//!
//! Provides key management and transaction creation.

use crate::core::{sign_tx_in, Transaction, TransactionError, TxIn, TxOut, UnspentTxOut, UtxoSet};
use crate::crypto::{KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
    #[error("Key file public key does not match its private key")]
    KeyMismatch,
}

/// On-disk key file
#[derive(Debug, Serialize, Deserialize)]
struct WalletData {
    private: String,
    public: String,
}

/// A blockchain wallet for managing keys and creating transactions
#[derive(Clone)]
pub struct Wallet {
    /// The key pair for signing transactions
    key_pair: KeyPair,
}

impl Wallet {
    /// Create a new wallet with a fresh key pair
    pub fn new() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    /// Import a wallet from a private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::from_private_key_hex(private_key_hex)?;
        Ok(Self { key_pair })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Get the wallet's address
    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Get the wallet's public key (hex)
    pub fn public_key(&self) -> String {
        self.key_pair.public_key_hex()
    }

    /// Get the wallet's private key (hex)
    /// WARNING: Keep this secret!
    pub fn private_key(&self) -> String {
        self.key_pair.private_key_hex()
    }

    /// Balance held at the wallet's address
    pub fn balance(&self, utxos: &UtxoSet) -> u64 {
        get_balance(&self.address(), utxos)
    }

    /// Create a signed transfer that skips outputs already claimed in `pool`
    pub fn create_transaction(
        &self,
        recipient: &str,
        amount: u64,
        utxos: &UtxoSet,
        pool: &[Transaction],
    ) -> Result<Transaction, WalletError> {
        create_transaction(recipient, amount, &self.key_pair, utxos, pool)
    }

    /// Save wallet to file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = WalletData {
            private: self.private_key(),
            public: self.public_key(),
        };

        let json = serde_json::to_string_pretty(&data)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let data: WalletData = serde_json::from_str(&json)?;

        let wallet = Self::from_private_key(&data.private)?;
        if wallet.public_key() != data.public.to_lowercase() {
            return Err(WalletError::KeyMismatch);
        }
        Ok(wallet)
    }

    /// Load the key file at `path`, creating it on first start
    pub fn load_or_create(path: &Path) -> Result<Self, WalletError> {
        if path.exists() {
            return Self::load(path);
        }
        let wallet = Self::new();
        wallet.save(path)?;
        log::info!("Created new wallet at {}", path.display());
        Ok(wallet)
    }

    /// Export wallet info (without private key)
    pub fn export_public_info(&self) -> WalletInfo {
        WalletInfo {
            address: self.address(),
            public_key: self.public_key(),
        }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Public wallet information (safe to share)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub address: String,
    pub public_key: String,
}

/// Sum of the outputs `address` owns
pub fn get_balance(address: &str, utxos: &UtxoSet) -> u64 {
    utxos.balance_of(address)
}

/// Take outputs in order until they cover `amount`.
///
/// Returns the chosen outputs and the change left over.
pub fn find_tx_outs_for_amount(
    amount: u64,
    available: &[UnspentTxOut],
) -> Result<(Vec<UnspentTxOut>, u64), WalletError> {
    let mut selected = Vec::new();
    let mut total = 0u64;

    for utxo in available {
        selected.push(utxo.clone());
        total = total.saturating_add(utxo.amount);
        if total >= amount {
            return Ok((selected, total - amount));
        }
    }

    Err(WalletError::InsufficientFunds {
        have: total,
        need: amount,
    })
}

/// Drop outputs some pooled transaction already spends
pub fn filter_pool_spent(owned: Vec<UnspentTxOut>, pool: &[Transaction]) -> Vec<UnspentTxOut> {
    let claimed: HashSet<_> = pool
        .iter()
        .flat_map(|tx| &tx.tx_ins)
        .map(|i| i.outpoint())
        .collect();
    owned
        .into_iter()
        .filter(|u| !claimed.contains(&u.outpoint()))
        .collect()
}

/// Build and sign a transfer of `amount` to `receiver`, with change back
/// to the sender when the inputs overshoot
pub fn create_transaction(
    receiver: &str,
    amount: u64,
    key_pair: &KeyPair,
    utxos: &UtxoSet,
    pool: &[Transaction],
) -> Result<Transaction, WalletError> {
    let sender = key_pair.address();
    let available = filter_pool_spent(utxos.owned_by(&sender), pool);
    let (inputs, change) = find_tx_outs_for_amount(amount, &available)?;

    let tx_ins = inputs
        .iter()
        .map(|u| TxIn {
            tx_out_id: u.tx_out_id.clone(),
            tx_out_index: u.tx_out_index,
            signature: String::new(),
        })
        .collect();

    let mut tx_outs = vec![TxOut {
        address: receiver.to_string(),
        amount,
    }];
    if change > 0 {
        tx_outs.push(TxOut {
            address: sender,
            amount: change,
        });
    }

    let mut tx = Transaction::new(tx_ins, tx_outs);
    for index in 0..tx.tx_ins.len() {
        tx.tx_ins[index].signature = sign_tx_in(&tx, index, key_pair, utxos)?;
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate_transaction;
    use tempfile::tempdir;

    /// Two reward outputs owned by `wallet`
    fn funded(wallet: &Wallet) -> UtxoSet {
        UtxoSet::new().apply(&[
            Transaction::coinbase(&wallet.address(), 1),
            Transaction::coinbase(&wallet.address(), 2),
        ])
    }

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert!(!wallet.address().is_empty());
        assert!(!wallet.public_key().is_empty());
        assert_eq!(wallet.balance(&UtxoSet::new()), 0);
    }

    #[test]
    fn test_wallet_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet").join("default.json");

        let wallet = Wallet::load_or_create(&path).unwrap();
        let loaded = Wallet::load_or_create(&path).unwrap();
        assert_eq!(wallet.address(), loaded.address());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["private"], wallet.private_key());
        assert_eq!(json["public"], wallet.public_key());
    }

    #[test]
    fn test_tampered_key_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key.json");
        Wallet::new().save(&path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["public"] = serde_json::Value::String(Wallet::new().public_key());
        fs::write(&path, json.to_string()).unwrap();

        assert!(matches!(Wallet::load(&path), Err(WalletError::KeyMismatch)));
    }

    #[test]
    fn test_transfer_with_change() {
        let wallet = Wallet::new();
        let utxos = funded(&wallet);

        let tx = wallet.create_transaction("bob", 70, &utxos, &[]).unwrap();
        assert_eq!(tx.tx_ins.len(), 2);
        assert_eq!(tx.tx_outs[0].amount, 70);
        assert_eq!(tx.tx_outs[1].address, wallet.address());
        assert_eq!(tx.tx_outs[1].amount, 30);
        assert!(validate_transaction(&tx, &utxos).is_ok());
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let wallet = Wallet::new();
        let utxos = funded(&wallet);

        let tx = wallet.create_transaction("bob", 50, &utxos, &[]).unwrap();
        assert_eq!(tx.tx_ins.len(), 1);
        assert_eq!(tx.tx_outs.len(), 1);
    }

    #[test]
    fn test_insufficient_funds() {
        let wallet = Wallet::new();
        let utxos = funded(&wallet);

        assert!(matches!(
            wallet.create_transaction("bob", 101, &utxos, &[]),
            Err(WalletError::InsufficientFunds { have: 100, need: 101 })
        ));
    }

    #[test]
    fn test_pooled_outputs_not_reused() {
        let wallet = Wallet::new();
        let utxos = funded(&wallet);

        let first = wallet.create_transaction("bob", 50, &utxos, &[]).unwrap();
        let second = wallet
            .create_transaction("carol", 50, &utxos, &[first.clone()])
            .unwrap();
        assert_ne!(first.tx_ins[0].outpoint(), second.tx_ins[0].outpoint());

        assert!(matches!(
            wallet.create_transaction("dave", 50, &utxos, &[first, second]),
            Err(WalletError::InsufficientFunds { have: 0, need: 50 })
        ));
    }
}
