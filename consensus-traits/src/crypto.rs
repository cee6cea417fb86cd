// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Hashing and signature primitives.
//!
//! Validators sign with Ed25519 (64-byte signatures, 32-byte public keys).
//! Identities are SHA-256 based: [`hash256`] is double SHA-256 and
//! [`hash160`] is its 20-byte prefix, used for script hashes.

use crate::core::{FormatError, UInt160, UInt256};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of a validator signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Size of a validator public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Raw validator signature.
pub type SignatureBytes = [u8; SIGNATURE_LEN];

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, the identity hash of every signed structure.
pub fn hash256(data: &[u8]) -> UInt256 {
    UInt256::new(sha256(&sha256(data)))
}

/// 160-bit digest used for script hashes.
///
/// This is the first 20 bytes of double SHA-256, not RIPEMD-160 over
/// SHA-256. Script hashes and addresses therefore differ from networks that
/// use RIPEMD-160; only nodes sharing this function agree on them.
pub fn hash160(data: &[u8]) -> UInt160 {
    let digest = sha256(&sha256(data));
    let mut out = [0u8; UInt160::LEN];
    out.copy_from_slice(&digest[..UInt160::LEN]);
    UInt160::new(out)
}

/// Data that is actually signed: the network magic followed by the hash.
///
/// Folding the magic in makes a signature useless on any other network.
pub fn hash_data(magic: u32, hash: &UInt256) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + UInt256::LEN);
    data.extend_from_slice(&magic.to_le_bytes());
    data.extend_from_slice(hash.as_bytes());
    data
}

/// Merkle root over a list of hashes.
///
/// Odd levels duplicate their last node. An empty list yields the zero hash.
pub fn merkle_root(hashes: &[UInt256]) -> UInt256 {
    if hashes.is_empty() {
        return UInt256::ZERO;
    }
    let mut level: Vec<UInt256> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(left.as_bytes());
                buf[32..].copy_from_slice(right.as_bytes());
                hash256(&buf)
            })
            .collect();
    }
    level[0]
}

/// A validator public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Parse and validate a compressed Ed25519 point.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes have the wrong length or are not a valid point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FormatError> {
        let array: [u8; PUBLIC_KEY_LEN] =
            bytes.try_into().map_err(|_| FormatError::InvalidLength {
                what: "public key",
                expected: PUBLIC_KEY_LEN,
                found: bytes.len(),
            })?;
        VerifyingKey::from_bytes(&array).map_err(|_| FormatError::InvalidLength {
            what: "public key point",
            expected: PUBLIC_KEY_LEN,
            found: bytes.len(),
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Check `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

/// A validator signing key.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Derive a key pair from a 32-byte secret.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let key = KeyPair::from_secret(&[3u8; 32]);
        let signature = key.sign(b"block");
        assert!(key.public_key().verify(b"block", &signature));
        assert!(!key.public_key().verify(b"other", &signature));
    }

    #[test]
    fn test_merkle_root_single_and_empty() {
        let leaf = hash256(b"leaf");
        assert_eq!(merkle_root(&[leaf]), leaf);
        assert_eq!(merkle_root(&[]), UInt256::ZERO);
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let a = hash256(b"a");
        let b = hash256(b"b");
        let c = hash256(b"c");
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_hash_data_includes_magic() {
        let hash = hash256(b"payload");
        assert_ne!(hash_data(1, &hash), hash_data(2, &hash));
        assert_eq!(&hash_data(7, &hash)[..4], &7u32.to_le_bytes());
    }

    #[test]
    fn test_hash160_is_truncated_hash256() {
        let digest = hash256(b"script");
        assert_eq!(hash160(b"script").as_bytes(), &digest.as_bytes()[..UInt160::LEN]);
    }

    #[test]
    fn test_public_key_rejects_bad_length() {
        assert!(PublicKey::from_slice(&[0u8; 31]).is_err());
    }
}
