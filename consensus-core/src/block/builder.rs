// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{Header, UInt160, UInt256, Witness};
use serde::{Deserialize, Serialize};

use super::{Block, ConsensusData};
use crate::error::{ConsensusError, Result};
use crate::transaction::Transaction;
use crate::types::{BlockIndex, ValidatorIndex};

/// Partially known consensus data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusDataOptions {
    pub primary_index: Option<ValidatorIndex>,
    pub nonce: Option<u64>,
}

impl ConsensusDataOptions {
    fn merge(self, other: ConsensusDataOptions) -> Self {
        Self {
            primary_index: other.primary_index.or(self.primary_index),
            nonce: other.nonce.or(self.nonce),
        }
    }
}

/// Field overrides applied by [`BlockBuilder::merge`]
///
/// `None` keeps the builder's current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockOptions {
    pub version: Option<u32>,
    pub previous_hash: Option<UInt256>,
    pub merkle_root: Option<UInt256>,
    pub timestamp: Option<u64>,
    pub index: Option<BlockIndex>,
    pub next_consensus: Option<UInt160>,
    pub witness: Option<Witness>,
    pub consensus_data: Option<ConsensusDataOptions>,
    pub transactions: Option<Vec<Transaction>>,
}

/// A block under construction
///
/// Every field stays optional until the round completes. The builder is a
/// value: [`BlockBuilder::merge`] returns a new builder and leaves the
/// original untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBuilder {
    pub version: Option<u32>,
    pub previous_hash: Option<UInt256>,
    pub merkle_root: Option<UInt256>,
    pub timestamp: Option<u64>,
    pub index: Option<BlockIndex>,
    pub next_consensus: Option<UInt160>,
    pub witness: Option<Witness>,
    pub consensus_data: ConsensusDataOptions,
    pub transactions: Option<Vec<Transaction>>,
}

impl BlockBuilder {
    /// Create a builder from an initial set of fields.
    pub fn new(options: BlockOptions) -> Self {
        Self::default().merge(options)
    }

    /// Return a new builder with `options` applied on top of this one.
    ///
    /// Nested consensus data is merged field by field, so setting the nonce
    /// does not forget the primary index.
    pub fn merge(&self, options: BlockOptions) -> Self {
        Self {
            version: options.version.or(self.version),
            previous_hash: options.previous_hash.or(self.previous_hash),
            merkle_root: options.merkle_root.or(self.merkle_root),
            timestamp: options.timestamp.or(self.timestamp),
            index: options.index.or(self.index),
            next_consensus: options.next_consensus.or(self.next_consensus),
            witness: options.witness.or_else(|| self.witness.clone()),
            consensus_data: match options.consensus_data {
                Some(data) => self.consensus_data.merge(data),
                None => self.consensus_data,
            },
            transactions: options.transactions.or_else(|| self.transactions.clone()),
        }
    }

    /// Drop everything the primary proposed in the current view.
    ///
    /// Round identity (version, previous hash, index, next consensus) and the
    /// primary index are kept.
    pub fn without_proposal(&self) -> Self {
        Self {
            merkle_root: None,
            timestamp: None,
            witness: None,
            transactions: None,
            consensus_data: ConsensusDataOptions {
                primary_index: self.consensus_data.primary_index,
                nonce: None,
            },
            ..self.clone()
        }
    }

    /// Primary of the current view, if assigned.
    pub fn primary_index(&self) -> Option<ValidatorIndex> {
        self.consensus_data.primary_index
    }

    /// Complete consensus data; the nonce defaults to zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::MissingPrimaryIndex`] if no primary is set.
    pub fn consensus_data(&self) -> Result<ConsensusData> {
        let primary_index = self
            .consensus_data
            .primary_index
            .ok_or(ConsensusError::MissingPrimaryIndex)?;
        Ok(ConsensusData {
            primary_index,
            nonce: self.consensus_data.nonce.unwrap_or(0),
        })
    }

    fn merkle_root_or_computed(&self, consensus_data: &ConsensusData) -> Result<UInt256> {
        match (self.merkle_root, &self.transactions) {
            (Some(root), _) => Ok(root),
            (None, Some(transactions)) => Ok(Block::compute_merkle_root(consensus_data, transactions)),
            (None, None) => Err(ConsensusError::MissingBlockField("merkle_root")),
        }
    }

    /// Header of the block under construction, without a witness.
    ///
    /// The merkle root is computed from the transactions when it has not
    /// been set explicitly.
    pub fn header(&self) -> Result<Header> {
        let consensus_data = self.consensus_data()?;
        Ok(Header {
            version: self.version.unwrap_or(0),
            previous_hash: self
                .previous_hash
                .ok_or(ConsensusError::MissingBlockField("previous_hash"))?,
            merkle_root: self.merkle_root_or_computed(&consensus_data)?,
            timestamp: self
                .timestamp
                .ok_or(ConsensusError::MissingBlockField("timestamp"))?,
            index: self.index.ok_or(ConsensusError::MissingBlockField("index"))?,
            next_consensus: self
                .next_consensus
                .ok_or(ConsensusError::MissingBlockField("next_consensus"))?,
            witness: self.witness.clone().unwrap_or_default(),
        })
    }

    /// Data signed by Commit messages for this block.
    pub fn header_hash_data(&self, magic: u32) -> Result<Vec<u8>> {
        Ok(self.header()?.hash_data(magic))
    }

    /// Build the final block.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::MissingPrimaryIndex`] if no primary is set and
    /// [`ConsensusError::MissingBlockField`] if any other required field is
    /// absent.
    pub fn get_block(&self) -> Result<Block> {
        let consensus_data = self.consensus_data()?;
        let transactions = self
            .transactions
            .clone()
            .ok_or(ConsensusError::MissingBlockField("transactions"))?;
        let header = self.header()?;
        Ok(Block::new(header, consensus_data, transactions))
    }
}
