// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Transactions as far as consensus needs to see them.
//!
//! Consensus never executes a transaction; it only hashes it, accounts for
//! its fees and checks oracle-response uniqueness while assembling a block.

use dbft_traits::crypto::hash256;
use dbft_traits::{BinaryReader, BinaryWriter, FormatError, Serializable, UInt160, UInt256, Witness};
use serde::{Deserialize, Serialize};

/// Maximum number of attributes on one transaction
pub const MAX_TRANSACTION_ATTRIBUTES: usize = 16;

/// Maximum script size in bytes
pub const MAX_SCRIPT_SIZE: usize = u16::MAX as usize;

const HIGH_PRIORITY: u8 = 0x01;
const ORACLE_RESPONSE: u8 = 0x11;
const MAX_ORACLE_RESULT: usize = u16::MAX as usize;

/// Transaction attribute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionAttribute {
    /// Committee-signed transaction that jumps the mempool queue
    HighPriority,

    /// Response to an oracle request
    OracleResponse { id: u64, code: u8, result: Vec<u8> },
}

impl Serializable for TransactionAttribute {
    fn serialize(&self, writer: &mut BinaryWriter) {
        match self {
            TransactionAttribute::HighPriority => writer.write_u8(HIGH_PRIORITY),
            TransactionAttribute::OracleResponse { id, code, result } => {
                writer.write_u8(ORACLE_RESPONSE);
                writer.write_u64(*id);
                writer.write_u8(*code);
                writer.write_var_bytes(result);
            }
        }
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        match reader.read_u8()? {
            HIGH_PRIORITY => Ok(TransactionAttribute::HighPriority),
            ORACLE_RESPONSE => Ok(TransactionAttribute::OracleResponse {
                id: reader.read_u64()?,
                code: reader.read_u8()?,
                result: reader.read_var_bytes(MAX_ORACLE_RESULT)?,
            }),
            other => Err(FormatError::UnknownAttributeType(other)),
        }
    }
}

/// A signed transaction
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub nonce: u32,
    /// Account paying the fees
    pub sender: UInt160,
    pub system_fee: u64,
    pub network_fee: u64,
    pub valid_until_block: u32,
    pub attributes: Vec<TransactionAttribute>,
    pub script: Vec<u8>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.version);
        writer.write_u32(self.nonce);
        writer.write_uint160(&self.sender);
        writer.write_u64(self.system_fee);
        writer.write_u64(self.network_fee);
        writer.write_u32(self.valid_until_block);
        writer.write_array(&self.attributes, |w, attribute| Serializable::serialize(attribute, w));
        writer.write_var_bytes(&self.script);
    }

    /// Transaction hash over the unsigned fields.
    ///
    /// Computed on each call: the fields are public, so a cached value could go
    /// stale after a mutation.
    pub fn hash(&self) -> UInt256 {
        let mut writer = BinaryWriter::new();
        self.serialize_unsigned(&mut writer);
        hash256(&writer.into_bytes())
    }

    /// Total fee the sender pays for this transaction.
    pub fn fee(&self) -> u64 {
        self.system_fee.saturating_add(self.network_fee)
    }

    /// Oracle request this transaction answers, if any.
    pub fn oracle_response_id(&self) -> Option<u64> {
        self.attributes.iter().find_map(|attribute| match attribute {
            TransactionAttribute::OracleResponse { id, .. } => Some(*id),
            TransactionAttribute::HighPriority => None,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        writer.write_array(&self.witnesses, |w, witness| Serializable::serialize(witness, w));
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            version: reader.read_u8()?,
            nonce: reader.read_u32()?,
            sender: reader.read_uint160()?,
            system_fee: reader.read_u64()?,
            network_fee: reader.read_u64()?,
            valid_until_block: reader.read_u32()?,
            attributes: reader.read_array(MAX_TRANSACTION_ATTRIBUTES, <TransactionAttribute as Serializable>::deserialize)?,
            script: reader.read_var_bytes(MAX_SCRIPT_SIZE)?,
            witnesses: reader.read_array(MAX_TRANSACTION_ATTRIBUTES, <Witness as Serializable>::deserialize)?,
        })
    }
}
