//! Cryptographic utilities for the blockchain
//!
//! This module provides:
//! - SHA-256 hashing
//! - ECDSA key management (secp256k1)
//! - Addresses (base-58 encoded public keys)

pub mod hash;
pub mod keys;

pub use hash::{sha256, sha256_hex, sha256_parts};
pub use keys::{
    public_key_from_address, public_key_to_address, verify_address_signature, KeyError, KeyPair,
};
