// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Block headers as seen by the consensus core.
//!
//! The ledger owns full blocks; consensus only needs headers (to chain the
//! next block onto) and trimmed blocks (header plus content hashes).

use crate::core::{FormatError, UInt160, UInt256};
use crate::crypto::{hash256, hash_data};
use crate::io::{BinaryReader, BinaryWriter, Serializable};
use crate::witness::{read_single_witness, write_single_witness, Witness};
use serde::{Deserialize, Serialize};

/// Upper bound on the number of hashes a trimmed block may carry.
pub const MAX_CONTENTS_PER_BLOCK: usize = u16::MAX as usize;

/// Lookup key for ledger queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashOrIndex {
    Hash(UInt256),
    Index(u32),
}

/// Signed block header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub previous_hash: UInt256,
    pub merkle_root: UInt256,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub index: u32,
    pub next_consensus: UInt160,
    pub witness: Witness,
}

impl Header {
    /// Encode the fields covered by the block hash.
    pub fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_uint256(&self.previous_hash);
        writer.write_uint256(&self.merkle_root);
        writer.write_u64(self.timestamp);
        writer.write_u32(self.index);
        writer.write_uint160(&self.next_consensus);
    }

    pub fn deserialize_unsigned(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            version: reader.read_u32()?,
            previous_hash: reader.read_uint256()?,
            merkle_root: reader.read_uint256()?,
            timestamp: reader.read_u64()?,
            index: reader.read_u32()?,
            next_consensus: reader.read_uint160()?,
            witness: Witness::default(),
        })
    }

    /// Block hash.
    pub fn hash(&self) -> UInt256 {
        let mut writer = BinaryWriter::with_capacity(112);
        self.serialize_unsigned(&mut writer);
        hash256(&writer.into_bytes())
    }

    /// Data validators sign when committing to this header.
    pub fn hash_data(&self, magic: u32) -> Vec<u8> {
        hash_data(magic, &self.hash())
    }
}

impl Serializable for Header {
    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        write_single_witness(writer, &self.witness);
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        let mut header = Self::deserialize_unsigned(reader)?;
        header.witness = read_single_witness(reader)?;
        Ok(header)
    }
}

/// A header plus the hashes of the block's contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimmedBlock {
    pub header: Header,
    pub hashes: Vec<UInt256>,
}

impl TrimmedBlock {
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }
}

impl Serializable for TrimmedBlock {
    fn serialize(&self, writer: &mut BinaryWriter) {
        Serializable::serialize(&self.header, writer);
        writer.write_array(&self.hashes, |w, hash| w.write_uint256(hash));
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        let header = <Header as Serializable>::deserialize(reader)?;
        let hashes = reader.read_array(MAX_CONTENTS_PER_BLOCK, |r| r.read_uint256())?;
        Ok(Self { header, hashes })
    }
}
