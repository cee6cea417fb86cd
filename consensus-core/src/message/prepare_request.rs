// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{BinaryReader, BinaryWriter, FormatError, Serializable, SignatureBytes, UInt160, UInt256};
use std::collections::HashSet;

use super::{MessageHeader, MessageType};
use crate::transaction::Transaction;
use crate::types::MAX_TRANSACTIONS_PER_BLOCK;

/// Maximum number of transaction hashes a prepare request may list
pub const MAX_TRANSACTION_HASHES: usize = MAX_TRANSACTIONS_PER_BLOCK;

/// The primary's block proposal
///
/// `transaction_hashes` fixes the block's contents and order. The first
/// transaction travels in full as `primary_transaction` so backups can check
/// the proposal is anchored to a real transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrepareRequest {
    pub header: MessageHeader,
    pub version: u32,
    pub previous_hash: UInt256,
    pub timestamp: u64,
    pub nonce: u64,
    pub next_consensus: UInt160,
    pub transaction_hashes: Vec<UInt256>,
    pub primary_transaction: Transaction,

    /// Primary's signature over the proposed block's header hash-data
    pub signature: SignatureBytes,
}

impl PrepareRequest {
    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        self.header.write(writer, MessageType::PrepareRequest);
        writer.write_u32(self.version);
        writer.write_uint256(&self.previous_hash);
        writer.write_u64(self.timestamp);
        writer.write_u64(self.nonce);
        writer.write_uint160(&self.next_consensus);
        writer.write_array(&self.transaction_hashes, |w, hash| w.write_uint256(hash));
        self.primary_transaction.serialize(writer);
        writer.write_bytes(&self.signature);
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> Result<Self, FormatError> {
        let header = MessageHeader::read(reader, MessageType::PrepareRequest, validators_count)?;
        let version = reader.read_u32()?;
        let previous_hash = reader.read_uint256()?;
        let timestamp = reader.read_u64()?;
        let nonce = reader.read_u64()?;
        let next_consensus = reader.read_uint160()?;
        let transaction_hashes = reader.read_array(MAX_TRANSACTION_HASHES, |r| r.read_uint256())?;

        let Some(first) = transaction_hashes.first().copied() else {
            return Err(FormatError::EmptyTransactionHashes);
        };
        let mut seen = HashSet::with_capacity(transaction_hashes.len());
        for hash in &transaction_hashes {
            if !seen.insert(*hash) {
                return Err(FormatError::DuplicateTransactionHash(*hash));
            }
        }

        let primary_transaction = Transaction::deserialize(reader)?;
        let found = primary_transaction.hash();
        if found != first {
            return Err(FormatError::PrimaryTransactionMismatch {
                expected: first,
                found,
            });
        }
        let signature = reader.read_array_fixed()?;

        Ok(Self {
            header,
            version,
            previous_hash,
            timestamp,
            nonce,
            next_consensus,
            transaction_hashes,
            primary_transaction,
            signature,
        })
    }
}
