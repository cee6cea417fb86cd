// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Blocks produced by consensus
//!
//! A block is a [`Header`] plus [`ConsensusData`] (who proposed it, with which
//! nonce) and the agreed transactions. Blocks are assembled incrementally by
//! [`BlockBuilder`] while a round is in progress.

mod builder;

pub use builder::{BlockBuilder, BlockOptions, ConsensusDataOptions};

use dbft_traits::crypto::{hash256, merkle_root};
use dbft_traits::{BinaryReader, BinaryWriter, FormatError, Header, Serializable, UInt256};
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;
use crate::types::{ValidatorIndex, MAX_TRANSACTIONS_PER_BLOCK};

/// Consensus metadata embedded in every block
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusData {
    /// Validator that proposed the block
    pub primary_index: ValidatorIndex,

    /// Random value chosen by the primary
    pub nonce: u64,
}

impl ConsensusData {
    pub fn hash(&self) -> UInt256 {
        hash256(&self.to_bytes())
    }
}

impl Serializable for ConsensusData {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.primary_index);
        writer.write_u64(self.nonce);
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            primary_index: reader.read_u8()?,
            nonce: reader.read_u64()?,
        })
    }
}

/// An immutable, complete block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    header: Header,
    consensus_data: ConsensusData,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block.
    ///
    /// The header's merkle root is replaced by the root over
    /// `[consensus_data.hash(), ...transaction hashes]` when it is zero.
    pub fn new(mut header: Header, consensus_data: ConsensusData, transactions: Vec<Transaction>) -> Self {
        if header.merkle_root.is_zero() {
            header.merkle_root = Self::compute_merkle_root(&consensus_data, &transactions);
        }
        Self {
            header,
            consensus_data,
            transactions,
        }
    }

    /// Merkle root over the consensus data and transaction hashes.
    pub fn compute_merkle_root(consensus_data: &ConsensusData, transactions: &[Transaction]) -> UInt256 {
        let hashes: Vec<UInt256> = std::iter::once(consensus_data.hash())
            .chain(transactions.iter().map(Transaction::hash))
            .collect();
        merkle_root(&hashes)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn consensus_data(&self) -> &ConsensusData {
        &self.consensus_data
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }
}

impl Serializable for Block {
    fn serialize(&self, writer: &mut BinaryWriter) {
        Serializable::serialize(&self.header, writer);
        writer.write_var_int(1 + self.transactions.len() as u64);
        Serializable::serialize(&self.consensus_data, writer);
        for transaction in &self.transactions {
            Serializable::serialize(transaction, writer);
        }
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        let header = <Header as Serializable>::deserialize(reader)?;
        let count = reader.read_var_int(MAX_TRANSACTIONS_PER_BLOCK as u64 + 1)? as usize;
        if count == 0 {
            return Err(FormatError::InvalidLength {
                what: "block contents",
                expected: 1,
                found: 0,
            });
        }
        let consensus_data = <ConsensusData as Serializable>::deserialize(reader)?;
        let mut transactions = Vec::with_capacity((count - 1).min(reader.remaining()));
        for _ in 1..count {
            transactions.push(<Transaction as Serializable>::deserialize(reader)?);
        }
        let computed = Self::compute_merkle_root(&consensus_data, &transactions);
        if computed != header.merkle_root {
            return Err(FormatError::PayloadMismatch("merkle root"));
        }
        Ok(Self {
            header,
            consensus_data,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbft_traits::{UInt160, Witness};

    fn header() -> Header {
        Header {
            previous_hash: UInt256::new([1; 32]),
            timestamp: 10,
            index: 3,
            next_consensus: UInt160::new([2; 20]),
            witness: Witness::new(vec![1], vec![2]),
            ..Default::default()
        }
    }

    fn tx(nonce: u32) -> Transaction {
        Transaction {
            nonce,
            ..Default::default()
        }
    }

    #[test]
    fn test_merkle_root_filled_when_absent() {
        let data = ConsensusData {
            primary_index: 1,
            nonce: 99,
        };
        let block = Block::new(header(), data, vec![tx(1), tx(2)]);
        assert_eq!(
            block.header().merkle_root,
            merkle_root(&[data.hash(), tx(1).hash(), tx(2).hash()])
        );
    }

    #[test]
    fn test_explicit_merkle_root_kept() {
        let mut h = header();
        h.merkle_root = UInt256::new([9; 32]);
        let block = Block::new(h, ConsensusData::default(), vec![]);
        assert_eq!(block.header().merkle_root, UInt256::new([9; 32]));
    }

    #[test]
    fn test_block_roundtrip_and_merkle_check() {
        let block = Block::new(header(), ConsensusData::default(), vec![tx(5)]);
        let bytes = block.to_bytes();
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);

        let mut forged = Block::new(header(), ConsensusData::default(), vec![tx(5)]);
        forged.transactions.push(tx(6));
        assert!(Block::from_bytes(&forged.to_bytes()).is_err());
    }
}
