//! Wallet module for key and transaction management

pub mod wallet;

pub use wallet::{
    create_transaction, filter_pool_spent, find_tx_outs_for_amount, get_balance, Wallet,
    WalletError, WalletInfo,
};
