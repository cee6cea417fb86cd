// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Error types for the consensus core.
//!
//! Untrusted input that fails to decode is a [`FormatError`] and is dropped by
//! the caller. [`ConsensusError`] covers everything else: the core was driven
//! in a way its invariants do not allow, or a collaborator failed.

use dbft_traits::{FormatError, UInt160, UInt256};

use crate::types::{BlockIndex, ValidatorIndex, ViewNumber};

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors raised by the consensus core
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Malformed or adversarial input
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Consensus data was requested before a primary was assigned
    #[error("Block builder has no primary index")]
    MissingPrimaryIndex,

    /// A block was requested before every required field was set
    #[error("Block builder is missing required field: {0}")]
    MissingBlockField(&'static str),

    /// A transaction was removed for a sender that never had fees recorded
    #[error("No fee recorded for sender {0}")]
    UntrackedSender(UInt160),

    /// Removing fees would take a sender's running total below zero
    #[error("Fee underflow for sender {0}")]
    FeeUnderflow(UInt160),

    /// A second, different payload arrived for an occupied slot
    #[error("Conflicting {kind} payload from validator {validator_index} in view {view_number}")]
    ConflictingPayload {
        kind: &'static str,
        validator_index: ValidatorIndex,
        view_number: ViewNumber,
    },

    /// A payload targets a different block than the one being agreed
    #[error("Payload for block {found} does not belong to round for block {expected}")]
    WrongRound {
        expected: BlockIndex,
        found: BlockIndex,
    },

    /// A payload was built with another block version
    #[error("Payload version {found} does not match block version {expected}")]
    WrongVersion { expected: u32, found: u32 },

    /// A payload extends a different chain tip
    #[error("Payload previous hash {found} does not match round previous hash {expected}")]
    WrongPreviousHash { expected: UInt256, found: UInt256 },

    /// A payload is from a different view than the context
    #[error("Payload for view {found} does not match current view {expected}")]
    WrongView {
        expected: ViewNumber,
        found: ViewNumber,
    },

    /// A payload was signed by a key that is not its declared sender
    #[error("Payload sender {sender} does not match signer {signer}")]
    WrongSigner { sender: UInt160, signer: UInt160 },

    /// A prepare request came from a validator that is not the primary
    #[error("Prepare request from validator {found}, primary is {expected}")]
    NotPrimary {
        expected: ValidatorIndex,
        found: ValidatorIndex,
    },

    /// The local node is not a validator of this round
    #[error("Local key is not part of the validator set")]
    NotValidator,

    /// Validator index does not name a member of this round's set
    #[error("Validator index {index} out of range for {count} validators")]
    UnknownValidator { index: usize, count: usize },

    /// A proposed transaction is not available locally
    #[error("Transaction {0} referenced by the proposal is not known")]
    MissingTransaction(UInt256),

    /// Not enough commits in the current view to sign the block
    #[error("Only {found} commits in current view, {required} required")]
    InsufficientCommits { found: usize, required: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Context snapshot could not be encoded or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// A collaborator (ledger, registry, verifier) failed
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl From<bincode::Error> for ConsensusError {
    fn from(err: bincode::Error) -> Self {
        ConsensusError::Snapshot(err.to_string())
    }
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Config(err.to_string())
    }
}
