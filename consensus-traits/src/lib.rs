// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! # dBFT Consensus Traits
//!
//! Primitive types, the binary wire codec and the collaborator interfaces the
//! dBFT consensus core is written against.
//!
//! ## Overview
//!
//! The consensus core agrees on one block per round among a fixed validator
//! set. Everything it does not own (the ledger, the validator registry, the
//! script VM, token balances) is reached through the async traits defined
//! here, so a node can plug in its own storage and execution layers.
//!
//! ## Contents
//!
//! - **Primitives**: [`UInt160`], [`UInt256`], [`PublicKey`], [`KeyPair`], [`Witness`]
//! - **Codec**: [`BinaryReader`], [`BinaryWriter`], [`Serializable`], [`FormatError`]
//! - **Scripts**: standard signature / multi-signature contracts ([`script`])
//! - **Ledger**: [`Header`], [`TrimmedBlock`], [`LedgerStore`]
//! - **Quorum**: [`get_f`], [`get_m`]
//! - **Collaborators**: [`ValidatorRegistry`], [`WitnessVerifier`], [`GasBalanceLookup`]
//!
//! ## License
//!
//! Licensed under the Apache License, Version 2.0 (LICENSE or http://www.apache.org/licenses/LICENSE-2.0)

pub mod block;
pub mod core;
pub mod crypto;
pub mod io;
pub mod network;
pub mod quorum;
pub mod script;
pub mod storage;
pub mod verification;
pub mod witness;

// Re-export commonly used items at the crate root
pub use block::{HashOrIndex, Header, TrimmedBlock};
pub use self::core::{Error, FormatError, UInt160, UInt256};
pub use crypto::{KeyPair, PublicKey, SignatureBytes, SIGNATURE_LEN};
pub use io::{BinaryReader, BinaryWriter, Serializable};
pub use network::ValidatorRegistry;
pub use quorum::{get_f, get_m};
pub use storage::{GasBalanceLookup, LedgerStore};
pub use verification::{SignatureWitnessVerifier, WitnessOutcome, WitnessVerifier};
pub use witness::Witness;

/// Result type alias for collaborator operations.
pub type Result<T> = std::result::Result<T, self::core::Error>;
