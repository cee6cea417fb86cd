// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! # dBFT Consensus Core Library
//!
//! This library provides the core of delegated Byzantine Fault Tolerant
//! consensus: the messages validators exchange, the payload envelopes that
//! carry them, the per-round state machine and final block assembly.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - [`message`] - The six consensus messages and their wire codec
//! - [`payload`] - Signed consensus payloads, extensible envelopes and compact
//!   recovery records
//! - [`context`] - Immutable per-round state and its transitions
//! - [`block`] - Blocks and the incremental [`BlockBuilder`]
//! - [`verification_context`] - Fee and oracle bookkeeping while a block fills
//! - [`types`] - Index types and the F/M quorum arithmetic
//!
//! ## Usage
//!
//! A node resolves its collaborators (ledger, validator registry, witness
//! verifier) through the traits in `dbft-traits`, then drives a
//! [`ConsensusContext`] with the payloads it receives:
//!
//! ```rust,no_run,ignore
//! use dbft_core::{ConsensusContext, ConsensusPayload};
//!
//! let context = ConsensusContext::new(Default::default())
//!     .reset_from_ledger(&ledger, &registry, &my_key, now_ms)
//!     .await?;
//!
//! let payload = ConsensusPayload::decode(&bytes, context.validators().len())?;
//! let context = context.with_payload(payload)?;
//! if context.count_committed() >= context.m() {
//!     let (context, block) = context.create_block()?;
//! }
//! ```

pub mod block;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod payload;
pub mod testing;
pub mod transaction;
pub mod types;
pub mod verification_context;

// Re-export commonly used types
pub use block::{Block, BlockBuilder, BlockOptions, ConsensusData, ConsensusDataOptions};
pub use config::ConsensusConfig;
pub use context::{ConsensusContext, ContextOptions, ContextSnapshot, ContextUpdate, ResetParams};
pub use error::{ConsensusError, Result};
pub use message::{ChangeViewReason, ConsensusMessage, MessageHeader, MessageType};
pub use payload::{ConsensusPayload, ExtensiblePayload, PayloadVerification, UnsignedConsensusPayload};
pub use transaction::{Transaction, TransactionAttribute};
pub use types::{get_f, get_m, BlockIndex, ValidatorIndex, ViewNumber};
pub use verification_context::{CheckFailure, TransactionCheck, TransactionVerificationContext};

/// Version of the dBFT protocol implemented by this library
pub const DBFT_VERSION: &str = "2.0";
