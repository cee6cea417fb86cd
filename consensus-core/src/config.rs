// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Consensus configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, Result};
use crate::types::MAX_TRANSACTIONS_PER_BLOCK;

/// Configuration for a consensus participant
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Network magic folded into every signed hash
    pub network: u32,

    /// Maximum number of transactions proposed in one block
    pub max_transactions_per_block: usize,

    /// Maximum serialized block size in bytes
    pub max_block_size: usize,

    /// Maximum total system fee of a block
    pub max_block_system_fee: u64,

    /// Target block interval
    pub milliseconds_per_block: u64,

    /// How far past the current height a consensus payload stays valid
    pub max_valid_until_block_increment: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            network: 0x334F_454E,
            max_transactions_per_block: 512,
            max_block_size: 262_144,
            max_block_system_fee: 150_000_000_000,
            milliseconds_per_block: 15_000,
            max_valid_until_block_increment: 5_760,
        }
    }
}

impl ConsensusConfig {
    /// Parse a JSON config, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits no block could satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.max_transactions_per_block == 0
            || self.max_transactions_per_block > MAX_TRANSACTIONS_PER_BLOCK
        {
            return Err(ConsensusError::Config(format!(
                "max_transactions_per_block must be in 1..={}, got {}",
                MAX_TRANSACTIONS_PER_BLOCK, self.max_transactions_per_block
            )));
        }
        if self.max_block_size == 0 {
            return Err(ConsensusError::Config("max_block_size must be positive".into()));
        }
        if self.milliseconds_per_block == 0 {
            return Err(ConsensusError::Config(
                "milliseconds_per_block must be positive".into(),
            ));
        }
        if self.max_valid_until_block_increment == 0 {
            return Err(ConsensusError::Config(
                "max_valid_until_block_increment must be positive".into(),
            ));
        }
        Ok(())
    }
}
