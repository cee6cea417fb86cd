// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Common types used throughout the consensus algorithm

pub use dbft_traits::quorum::{get_f, get_m};

/// A view number within a round
///
/// Each round starts at view 0 and advances through ChangeView agreement
/// whenever the current primary fails to get a block accepted.
pub type ViewNumber = u8;

/// Position of a validator in the round's validator list
pub type ValidatorIndex = u8;

/// Height of a block
pub type BlockIndex = u32;

/// Payload category used for consensus traffic
pub const CONSENSUS_CATEGORY: &str = "dBFT";

/// Maximum number of validators a round may have
///
/// Validator indexes travel as a single byte on the wire.
pub const MAX_VALIDATORS: usize = u8::MAX as usize;

/// Maximum number of transactions a single block may carry
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = u16::MAX as usize;
