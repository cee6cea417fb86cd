// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Core primitive types for consensus.
//!
//! This module defines the fixed-width hash types shared by every layer of the
//! consensus core and the error type raised when untrusted bytes do not decode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for collaborator operations (storage, registry, verification).
pub type Error = anyhow::Error;

/// Errors raised while decoding or validating untrusted input.
///
/// A format error always means "drop the message": it is produced for
/// malformed or adversarial bytes and never for local programming mistakes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("Variable-length integer {value} exceeds maximum {max}")]
    VarIntTooLarge { value: u64, max: u64 },

    #[error("Invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    #[error("Invalid {what} length: expected {expected}, found {found}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Unknown consensus message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Consensus message type mismatch: expected {expected:#04x}, found {found:#04x}")]
    MessageTypeMismatch { expected: u8, found: u8 },

    #[error("Unknown change view reason: {0:#04x}")]
    UnknownChangeViewReason(u8),

    #[error("Unknown transaction attribute type: {0:#04x}")]
    UnknownAttributeType(u8),

    #[error("New view number must be greater than zero")]
    ZeroNewViewNumber,

    #[error("Validator index {index} out of range for {count} validators")]
    ValidatorIndexOutOfRange { index: u8, count: usize },

    #[error("Duplicate validator index {0}")]
    DuplicateValidatorIndex(u8),

    #[error("Duplicate transaction hash {0}")]
    DuplicateTransactionHash(UInt256),

    #[error("Prepare request carries no transaction hashes")]
    EmptyTransactionHashes,

    #[error("Primary transaction hash {found} does not match first hash {expected}")]
    PrimaryTransactionMismatch { expected: UInt256, found: UInt256 },

    #[error("Expected exactly 1 witness, found {0}")]
    WitnessCount(usize),

    #[error("Payload and message disagree on {0}")]
    PayloadMismatch(&'static str),

    #[error("Invalid payload category: {0}")]
    InvalidCategory(String),
}

macro_rules! fixed_hash {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize,
        )]
        pub struct $name([u8; $len]);

        impl $name {
            /// Size of the hash in bytes.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Wrap a fixed-size byte array.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Create a hash from a byte slice.
            ///
            /// # Errors
            ///
            /// Returns an error if the slice has the wrong length.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, FormatError> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| FormatError::InvalidLength {
                    what: stringify!($name),
                    expected: $len,
                    found: bytes.len(),
                })?;
                Ok(Self(array))
            }

            /// Get the byte representation of this hash.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Whether every byte is zero.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(trimmed)?;
                Ok(Self::from_slice(&bytes)?)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }
    };
}

fixed_hash!(
    /// 160-bit hash, used for script hashes (account addresses).
    UInt160,
    20
);

fixed_hash!(
    /// 256-bit hash, used for block, transaction and payload identities.
    UInt256,
    32
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_zero() {
        assert!(UInt256::ZERO.is_zero());
        assert_eq!(UInt160::ZERO.as_bytes(), &[0u8; 20]);
    }

    #[test]
    fn test_hash_from_slice_rejects_wrong_length() {
        let err = UInt256::from_slice(&[1u8; 31]).unwrap_err();
        assert_eq!(
            err,
            FormatError::InvalidLength {
                what: "UInt256",
                expected: 32,
                found: 31
            }
        );
    }

    #[test]
    fn test_hash_display_parse_roundtrip() {
        let hash = UInt160::new([0xab; 20]);
        let text = hash.to_string();
        assert!(text.starts_with("0xabab"));
        assert_eq!(text.parse::<UInt160>().unwrap(), hash);
    }

    #[test]
    fn test_hash_serde_json() {
        let hash = UInt256::new([7u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        let back: UInt256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
