//! secp256k1 keys, addresses and input signatures
//!
//! An address is the base-58 encoding of the serialized public key. There
//! is no hash, version byte or checksum, so whoever checks a signature
//! recovers the verifying key straight from the address being spent.
//!
//! Signatures are DER-encoded ECDSA over a 32-byte digest (a transaction
//! id), carried as lowercase hex.

use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Digest must be 32 bytes, got {0}")]
    DigestLength(usize),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A signing key and the address it controls
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Import a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key = SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Compressed public key as hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The address other parties pay to
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a 32-byte digest, returning the DER signature as hex
    pub fn sign_digest(&self, digest: &[u8]) -> Result<String, KeyError> {
        let message = digest_message(digest)?;
        let signature = Secp256k1::signing_only().sign_ecdsa(&message, &self.secret_key);
        Ok(hex::encode(&*signature.serialize_der()))
    }
}

/// Encode a public key as an address
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    bs58::encode(public_key.serialize()).into_string()
}

/// Recover the public key an address encodes
///
/// Accepts both compressed (33 byte) and uncompressed (65 byte) keys.
pub fn public_key_from_address(address: &str) -> Result<PublicKey, KeyError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Whether `signature_hex` signs `digest` under the key `address` encodes.
///
/// Anything undecodable counts as a bad signature.
pub fn verify_address_signature(address: &str, digest: &[u8], signature_hex: &str) -> bool {
    let Ok(public_key) = public_key_from_address(address) else {
        return false;
    };
    let Ok(message) = digest_message(digest) else {
        return false;
    };
    let Some(signature) = hex::decode(signature_hex)
        .ok()
        .and_then(|der| Signature::from_der(&der).ok())
    else {
        return false;
    };

    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}

fn digest_message(digest: &[u8]) -> Result<Message, KeyError> {
    if digest.len() != 32 {
        return Err(KeyError::DigestLength(digest.len()));
    }
    Ok(Message::from_digest_slice(digest)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn test_sign_and_verify_by_address() {
        let kp = KeyPair::generate();
        let digest = sha256(b"spend output 0");

        let signature = kp.sign_digest(&digest).unwrap();
        assert!(verify_address_signature(&kp.address(), &digest, &signature));

        let other = KeyPair::generate();
        assert!(!verify_address_signature(&other.address(), &digest, &signature));

        let tampered = sha256(b"spend output 1");
        assert!(!verify_address_signature(&kp.address(), &tampered, &signature));
    }

    #[test]
    fn test_garbage_signatures_rejected() {
        let kp = KeyPair::generate();
        let digest = sha256(b"id");
        assert!(!verify_address_signature(&kp.address(), &digest, ""));
        assert!(!verify_address_signature(&kp.address(), &digest, "zz"));
        assert!(!verify_address_signature("not-an-address", &digest, "3045"));
    }

    #[test]
    fn test_digest_must_be_32_bytes() {
        let kp = KeyPair::generate();
        assert!(matches!(
            kp.sign_digest(b"short"),
            Err(KeyError::DigestLength(5))
        ));
    }

    #[test]
    fn test_private_key_import() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert_eq!(kp1.address(), kp2.address());

        assert!(matches!(
            KeyPair::from_private_key_hex("not-hex"),
            Err(KeyError::InvalidPrivateKey)
        ));
        assert!(KeyPair::from_private_key_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_address_encodes_public_key() {
        let kp = KeyPair::generate();
        let recovered = public_key_from_address(&kp.address()).unwrap();
        assert_eq!(&recovered, kp.public_key());
    }

    #[test]
    fn test_garbage_address_rejected() {
        assert!(public_key_from_address("0OIl").is_err());
        assert!(public_key_from_address("abc").is_err());
    }
}
